//! Playback error type.
//!
//! [`PlaybackError`] is the single error surfaced by the engine. Errors from
//! the core, engine and storage crates convert into it, sorted by how a
//! caller should react: fatal integrity problems, recoverable validation
//! failures, unavailable generation, and retryable write conflicts.

use pathwise_core::{CoreError, IntegrityViolation};
use pathwise_engine::EngineError;
use pathwise_storage::StorageError;

use crate::generation::GenerationError;

/// Errors surfaced by the playback engine.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The course graph is broken. Fatal for the course.
    #[error("graph integrity: {reason}")]
    GraphIntegrity {
        reason: String,
        violations: Vec<IntegrityViolation>,
    },

    /// The learner's answer was rejected; nothing was written.
    #[error("invalid interaction: {0}")]
    InteractionValidation(EngineError),

    /// The content generation backend failed or timed out.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// A compare-and-swap write kept losing to other writers.
    #[error("concurrent update conflict on {record} after {attempts} attempt(s)")]
    ConcurrentUpdateConflict { record: String, attempts: u32 },

    /// A course, node or learner record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    pub(crate) fn integrity(reason: impl Into<String>) -> Self {
        PlaybackError::GraphIntegrity {
            reason: reason.into(),
            violations: Vec::new(),
        }
    }

    /// Returns `true` for write conflicts worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PlaybackError::ConcurrentUpdateConflict { .. })
    }

    /// Returns `true` when the caller can recover without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::InteractionValidation(_)
                | PlaybackError::GenerationUnavailable(_)
                | PlaybackError::ConcurrentUpdateConflict { .. }
        )
    }
}

impl From<CoreError> for PlaybackError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NodeNotFound { .. }
            | CoreError::ConceptNotFound { .. }
            | CoreError::MisconceptionNotFound { .. } => PlaybackError::NotFound(err.to_string()),
            CoreError::GraphIntegrity { violations } => PlaybackError::GraphIntegrity {
                reason: format!("{} violation(s)", violations.len()),
                violations,
            },
            CoreError::InvalidEdge { .. } | CoreError::Decode(_) => {
                PlaybackError::integrity(err.to_string())
            }
        }
    }
}

impl From<EngineError> for PlaybackError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoMatchingEdge { .. } => PlaybackError::integrity(err.to_string()),
            EngineError::UnknownNode { .. } => PlaybackError::NotFound(err.to_string()),
            _ => PlaybackError::InteractionValidation(err),
        }
    }
}

impl From<StorageError> for PlaybackError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CourseNotFound(_) => PlaybackError::NotFound(err.to_string()),
            StorageError::VersionConflict { record, .. } => {
                PlaybackError::ConcurrentUpdateConflict {
                    record,
                    attempts: 1,
                }
            }
            StorageError::Course(core) => PlaybackError::from(core),
            other => PlaybackError::Storage(other),
        }
    }
}

impl From<GenerationError> for PlaybackError {
    fn from(err: GenerationError) -> Self {
        PlaybackError::GenerationUnavailable(err.to_string())
    }
}
