//! Pure playback algorithms for pathwise.
//!
//! Nothing in this crate performs I/O or holds learner state. Each function
//! takes the immutable course plus a snapshot of the learner's records and
//! returns a decision or an updated record:
//!
//! - [`scoring`]: answer validation and scoring
//! - [`misconception`]: signature matching on wrong answers
//! - [`mastery`]: Bayesian-weighted mastery update
//! - [`navigation`]: edge selection, remediation fallback, lookahead
//! - [`sm2`]: SM-2 review scheduling
//! - [`queue`]: interleaved daily review queue

pub mod error;
pub mod mastery;
pub mod misconception;
pub mod navigation;
pub mod queue;
pub mod scoring;
pub mod sm2;

pub use error::EngineError;
pub use mastery::{update_mastery, MasteryPolicy};
pub use navigation::{
    fallback_target, lookahead, optional_branches, select_edge, select_non_remediation_edge,
    LearnerSnapshot, Lookahead, LookaheadStop, NavigationPolicy,
};
pub use queue::{build_daily_queue, interleave, DueConcept, ReviewCard, MAX_CONSECUTIVE};
pub use scoring::{score_answer, validate_answer};
pub use sm2::{is_leech, quality_from_score, schedule_review, ReviewPolicy};
