//! Per-learner records.
//!
//! These are kept outside the shared [`Course`](crate::course::Course) value
//! and persisted by the storage layer keyed by (user, course, concept) or
//! (user, course).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{ConceptId, CourseId, MisconceptionId, NodeId, UserId};

/// Smallest allowed SM-2 easiness factor.
pub const MIN_EASINESS: f64 = 1.3;
/// SM-2 easiness factor of a fresh schedule.
pub const INITIAL_EASINESS: f64 = 2.5;

/// Pass/fail verdict of a scored interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

/// A learner's answer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Choice(usize),
    MultiChoice(Vec<usize>),
    Text(String),
    Numeric(f64),
}

/// Confidence-weighted estimate of understanding of one concept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteryState {
    /// In `[0, 1]`.
    pub mastery: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub attempt_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl MasteryState {
    /// State of a concept the learner has never touched.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        MasteryState {
            mastery: 0.0,
            confidence: 0.0,
            attempt_count: 0,
            updated_at: now,
        }
    }
}

/// SM-2 review schedule of one concept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewSchedule {
    /// Never below 1.
    pub interval_days: u32,
    /// Never below [`MIN_EASINESS`].
    pub easiness_factor: f64,
    pub due_at: DateTime<Utc>,
    pub streak: u32,
    pub lapse_count: u32,
    #[serde(default)]
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewSchedule {
    /// A schedule first due one day after `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        ReviewSchedule {
            interval_days: 1,
            easiness_factor: INITIAL_EASINESS,
            due_at: now + Duration::days(1),
            streak: 0,
            lapse_count: 0,
            last_reviewed_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// A learner's position in a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub user: UserId,
    pub course: CourseId,
    pub current_node: NodeId,
    /// Every node entered, in order, starting with the entry node.
    pub visited: Vec<NodeId>,
    pub completed: bool,
    /// Outcome of the last interaction on the current node, consumed by the
    /// next advance.
    #[serde(default)]
    pub last_outcome: Option<Outcome>,
    /// Misconception detected on that interaction.
    #[serde(default)]
    pub active_misconception: Option<MisconceptionId>,
    /// Remediation nodes entered in the current chain.
    #[serde(default)]
    pub remediation_hops: u32,
    pub updated_at: DateTime<Utc>,
}

impl CourseProgress {
    /// Progress of a learner who has just opened the course.
    pub fn start(user: UserId, course: CourseId, entry: NodeId, now: DateTime<Utc>) -> Self {
        CourseProgress {
            user,
            course,
            current_node: entry,
            visited: vec![entry],
            completed: false,
            last_outcome: None,
            active_misconception: None,
            remediation_hops: 0,
            updated_at: now,
        }
    }
}

/// Append-only audit record of one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionAttempt {
    pub id: Uuid,
    pub user: UserId,
    pub course: CourseId,
    pub node: NodeId,
    pub concepts: Vec<ConceptId>,
    pub score: f64,
    pub outcome: Outcome,
    pub misconception: Option<MisconceptionId>,
    pub answered_at: DateTime<Utc>,
}
