//! Bayesian-weighted mastery update.
//!
//! Each scored answer is evidence with a weight fixed by the node's kind and
//! difficulty. The prior mastery is weighted by the learner's confidence, so
//! early answers move the estimate a lot and later ones refine it:
//!
//! ```text
//! mastery'    = (confidence * mastery + weight * score) / (confidence + weight)
//! confidence' = min(1, confidence + increment)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pathwise_core::learner::MasteryState;
use pathwise_core::node::{Difficulty, NodeKind};

/// Tunable constants of the mastery update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryPolicy {
    pub confidence_increment: f64,
    pub intro_weight: f64,
    pub core_weight: f64,
    pub stretch_weight: f64,
    /// Review answers are stronger evidence of retention.
    pub review_multiplier: f64,
}

impl Default for MasteryPolicy {
    fn default() -> Self {
        MasteryPolicy {
            confidence_increment: 0.1,
            intro_weight: 0.2,
            core_weight: 0.3,
            stretch_weight: 0.4,
            review_multiplier: 1.25,
        }
    }
}

impl MasteryPolicy {
    /// Evidence weight of an answer on a node of `kind` and `difficulty`.
    pub fn evidence_weight(&self, kind: NodeKind, difficulty: Difficulty) -> f64 {
        let base = match difficulty {
            Difficulty::Intro => self.intro_weight,
            Difficulty::Core => self.core_weight,
            Difficulty::Stretch => self.stretch_weight,
        };
        let weight = match kind {
            NodeKind::Review => base * self.review_multiplier,
            _ => base,
        };
        weight.max(0.0)
    }
}

/// Folds one scored answer into `prior`.
///
/// `score` is clamped to `[0, 1]`; the result always keeps mastery and
/// confidence inside `[0, 1]`.
pub fn update_mastery(
    prior: &MasteryState,
    score: f64,
    weight: f64,
    confidence_increment: f64,
    now: DateTime<Utc>,
) -> MasteryState {
    let score = unit(score);
    let prior_mastery = unit(prior.mastery);
    let prior_confidence = unit(prior.confidence);
    let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };

    let denominator = prior_confidence + weight;
    let mastery = if denominator > f64::EPSILON {
        (prior_confidence * prior_mastery + weight * score) / denominator
    } else {
        prior_mastery
    };
    let increment = if confidence_increment.is_finite() {
        confidence_increment.max(0.0)
    } else {
        0.0
    };

    MasteryState {
        mastery: unit(mastery),
        confidence: (prior_confidence + increment).min(1.0),
        attempt_count: prior.attempt_count.saturating_add(1),
        updated_at: now,
    }
}

/// Clamps into `[0, 1]`, mapping NaN to 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
