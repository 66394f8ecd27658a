//! Storage error types for pathwise-storage.
//!
//! [`StorageError`] covers the failure modes of both backends: SQLite and
//! migration failures, JSON encoding of nested records, missing courses,
//! courses that no longer validate, and compare-and-swap conflicts.

use pathwise_core::id::CourseId;
use pathwise_core::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite driver reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration could not be applied.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored course failed to decode or validate.
    #[error("stored course is invalid: {0}")]
    Course(#[from] CoreError),

    /// A course with the given ID was not found.
    #[error("course not found: {0}")]
    CourseNotFound(CourseId),

    /// The record changed since it was read.
    #[error("version conflict on {record}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        record: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// A lock guarding in-process state was poisoned by a panic.
    #[error("storage lock poisoned")]
    Poisoned,

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}

impl StorageError {
    /// Returns `true` for compare-and-swap failures that a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}
