//! Course graph data model for the pathwise playback engine.
//!
//! - [`course`]: the immutable [`Course`] arena and its [`CourseBuilder`]
//! - [`node`], [`edge`], [`concept`]: graph element types
//! - [`learner`]: per-learner records kept outside the shared graph
//! - [`validate`]: load-time structural validation

pub mod concept;
pub mod course;
pub mod edge;
pub mod error;
pub mod id;
pub mod learner;
pub mod node;
pub mod validate;

// Re-export commonly used types
pub use concept::{Concept, Misconception, Signature};
pub use course::{Course, CourseBuilder, CourseMeta, EdgeView, CATCH_ALL_PRIORITY};
pub use edge::{Edge, EdgeCondition};
pub use error::CoreError;
pub use id::{ConceptId, CourseId, EdgeId, MisconceptionId, NodeId, UserId};
pub use learner::{
    Answer, CourseProgress, InteractionAttempt, MasteryState, Outcome, ReviewSchedule,
    INITIAL_EASINESS, MIN_EASINESS,
};
pub use node::{AnswerKey, ContentRef, Difficulty, Node, NodeKind};
pub use validate::{validate, IntegrityViolation};
