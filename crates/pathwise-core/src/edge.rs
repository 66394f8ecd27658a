//! Conditional edges between course nodes.
//!
//! Edges out of a node are evaluated in ascending `priority`. Every
//! non-terminal node carries exactly one [`EdgeCondition::Always`] edge with
//! the highest priority number, the catch-all that keeps navigation from
//! dead-ending.

use serde::{Deserialize, Serialize};

/// Predicate selecting the next node after the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Unconditional fallback.
    Always,
    /// The last interaction was answered correctly.
    Pass,
    /// The last interaction was answered incorrectly.
    Fail,
    /// Mastery of the node's concepts is below the low threshold.
    MasteryLow,
    /// Mastery of the node's concepts is at or above the high threshold.
    MasteryHigh,
    /// A learner-chosen detour; never taken automatically.
    Optional,
}

impl EdgeCondition {
    /// Returns `true` when the condition depends on the outcome of an
    /// interaction that has not happened yet.
    pub fn depends_on_outcome(&self) -> bool {
        matches!(self, EdgeCondition::Pass | EdgeCondition::Fail)
    }

    /// Returns `true` when the condition reads the learner's mastery.
    pub fn depends_on_mastery(&self) -> bool {
        matches!(self, EdgeCondition::MasteryLow | EdgeCondition::MasteryHigh)
    }
}

/// Edge weight stored in the course arena. Source and target come from the
/// graph itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub condition: EdgeCondition,
    /// Lower values are evaluated first.
    pub priority: u16,
}

impl Edge {
    pub fn new(condition: EdgeCondition, priority: u16) -> Self {
        Edge {
            condition,
            priority,
        }
    }
}
