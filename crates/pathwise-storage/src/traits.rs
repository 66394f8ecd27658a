//! Storage contracts for courses and learner records.
//!
//! Both traits take `&self`: backends guard their state internally so a
//! single store can be shared as `Arc<dyn PlaybackStore>` across tasks.
//! Calls are synchronous and short; every write is atomic.

use pathwise_core::course::Course;
use pathwise_core::id::{ConceptId, CourseId, UserId};
use pathwise_core::learner::{CourseProgress, InteractionAttempt, MasteryState, ReviewSchedule};

use crate::error::StorageError;
use crate::types::{
    ConceptKey, CourseSummary, InteractionCommit, ProgressKey, Versioned, VersionedWrite,
};

/// Persistence of immutable courses.
pub trait CourseStore {
    /// Stores a course and returns its id. Saving a course whose fingerprint
    /// is already stored returns the existing id.
    fn save_course(&self, course: &Course) -> Result<CourseId, StorageError>;

    /// Loads and re-validates a stored course.
    fn load_course(&self, id: CourseId) -> Result<Course, StorageError>;

    /// Deletes a course and every learner record attached to it.
    fn delete_course(&self, id: CourseId) -> Result<(), StorageError>;

    /// Lists all stored courses in id order.
    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError>;
}

/// Persistence of per-learner records with compare-and-swap writes.
pub trait LearnerStore {
    // -------------------------------------------------------------------
    // Mastery
    // -------------------------------------------------------------------

    fn load_mastery(&self, key: &ConceptKey)
        -> Result<Option<Versioned<MasteryState>>, StorageError>;

    /// Writes mastery if the stored version matches, returning the new version.
    fn save_mastery(
        &self,
        write: &VersionedWrite<ConceptKey, MasteryState>,
    ) -> Result<u64, StorageError>;

    /// All mastery records of a learner in one course, by concept id.
    fn mastery_for_course(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<(ConceptId, Versioned<MasteryState>)>, StorageError>;

    // -------------------------------------------------------------------
    // Review schedules
    // -------------------------------------------------------------------

    fn load_review(
        &self,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<ReviewSchedule>>, StorageError>;

    fn save_review(
        &self,
        write: &VersionedWrite<ConceptKey, ReviewSchedule>,
    ) -> Result<u64, StorageError>;

    /// Every review schedule of a learner across courses, ordered by key.
    fn reviews_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<(ConceptKey, Versioned<ReviewSchedule>)>, StorageError>;

    // -------------------------------------------------------------------
    // Progress
    // -------------------------------------------------------------------

    fn load_progress(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<Versioned<CourseProgress>>, StorageError>;

    fn save_progress(
        &self,
        write: &VersionedWrite<ProgressKey, CourseProgress>,
    ) -> Result<u64, StorageError>;

    // -------------------------------------------------------------------
    // Interactions
    // -------------------------------------------------------------------

    /// Applies every write of `commit` and appends its attempt, or nothing
    /// if any precondition fails.
    fn commit_interaction(&self, commit: &InteractionCommit) -> Result<(), StorageError>;

    /// Attempts of a learner in one course, oldest first.
    fn attempts_for(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<InteractionAttempt>, StorageError>;
}

/// A backend usable by the playback engine.
pub trait PlaybackStore: CourseStore + LearnerStore + Send + Sync {}

impl<T: CourseStore + LearnerStore + Send + Sync> PlaybackStore for T {}
