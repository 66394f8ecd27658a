//! Concepts and the misconceptions known for them.

use serde::{Deserialize, Serialize};

use crate::id::{ConceptId, MisconceptionId};

/// A distinct skill unit referenced by nodes, mastery and review schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
}

/// Pattern matched against a wrong answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signature {
    /// Normalized free-text answer equals the pattern.
    ExactText { text: String },
    /// Normalized free-text answer contains the pattern.
    ContainsText { text: String },
    /// The learner selected this option (single or multi-select).
    Choice { index: usize },
    /// A numeric answer fell inside `[min, max]`.
    NumericRange { min: f64, max: f64 },
}

/// A known wrong mental model for a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misconception {
    pub id: MisconceptionId,
    pub concept: ConceptId,
    pub signature: Signature,
    /// Short corrective text, also the last-resort remediation content.
    pub hint: String,
}
