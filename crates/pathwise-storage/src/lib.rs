//! Storage abstraction for pathwise courses and learner records.
//!
//! Provides the [`CourseStore`] and [`LearnerStore`] traits defining the
//! storage contract, plus [`InMemoryStore`] and [`SqliteStore`] as
//! first-class backends.
//!
//! # Consistency
//!
//! Learner records are versioned. Writes name the version they were computed
//! from and fail with [`StorageError::VersionConflict`] if the record moved
//! on; an [`InteractionCommit`] applies all of its writes and the attempt
//! log entry atomically or not at all.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: record keys, versioned envelopes, commit batches
//! - [`traits`]: storage trait definitions
//! - [`hash`]: blake3 content hashes and course fingerprints
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use hash::{content_hash, course_fingerprint, text_hash};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CourseStore, LearnerStore, PlaybackStore};
pub use types::{
    ConceptKey, CourseSummary, InteractionCommit, ProgressKey, Versioned, VersionedWrite,
};
