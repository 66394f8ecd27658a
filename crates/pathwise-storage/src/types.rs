//! Storage-layer record keys and versioned envelopes.
//!
//! Every per-learner record is stored as a [`Versioned`] value. Writers pass
//! the version they read (or `None` for a record they expect to create) and
//! the store rejects the write if another writer got there first.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use pathwise_core::id::{ConceptId, CourseId, UserId};
use pathwise_core::learner::{CourseProgress, InteractionAttempt, MasteryState, ReviewSchedule};

/// A stored value with its monotonically increasing version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    /// Starts at 1 on creation.
    pub version: u64,
}

/// Key of per-concept learner records (mastery, review schedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptKey {
    pub user: UserId,
    pub course: CourseId,
    pub concept: ConceptId,
}

impl fmt::Display for ConceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/concept {}", self.user.0, self.course, self.concept)
    }
}

/// Key of per-course learner records (progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressKey {
    pub user: UserId,
    pub course: CourseId,
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user.0, self.course)
    }
}

/// A compare-and-swap write: `value` replaces the record at `key` only if
/// its current version equals `expected` (`None` means "must not exist").
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedWrite<K, T> {
    pub key: K,
    pub expected: Option<u64>,
    pub value: T,
}

impl<K, T> VersionedWrite<K, T> {
    pub fn new(key: K, expected: Option<u64>, value: T) -> Self {
        VersionedWrite {
            key,
            expected,
            value,
        }
    }

    /// Version the record will carry after the write.
    pub fn next_version(&self) -> u64 {
        self.expected.map_or(1, |v| v + 1)
    }
}

/// Everything one scored answer changes, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionCommit {
    pub mastery: Vec<VersionedWrite<ConceptKey, MasteryState>>,
    pub reviews: Vec<VersionedWrite<ConceptKey, ReviewSchedule>>,
    /// Present when the answered node is the learner's current node.
    pub progress: Option<VersionedWrite<ProgressKey, CourseProgress>>,
    pub attempt: InteractionAttempt,
}

impl InteractionCommit {
    /// Rejects a commit that writes the same record twice.
    pub(crate) fn check_distinct_keys(&self) -> Result<(), crate::error::StorageError> {
        let mut mastery = HashSet::new();
        let mut reviews = HashSet::new();
        let repeated = self
            .mastery
            .iter()
            .map(|w| w.key)
            .find(|key| !mastery.insert(*key))
            .or_else(|| self.reviews.iter().map(|w| w.key).find(|key| !reviews.insert(*key)));
        match repeated {
            Some(key) => Err(crate::error::StorageError::IntegrityError {
                reason: format!("commit writes {key} more than once"),
            }),
            None => Ok(()),
        }
    }
}

/// Summary of a stored course (for listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: CourseId,
    pub title: String,
    /// Hex blake3 fingerprint of the course JSON.
    pub fingerprint: String,
}

/// Checks a compare-and-swap precondition, returning the new version.
pub(crate) fn check_version(
    record: impl fmt::Display,
    actual: Option<u64>,
    expected: Option<u64>,
) -> Result<u64, crate::error::StorageError> {
    if actual != expected {
        return Err(crate::error::StorageError::VersionConflict {
            record: record.to_string(),
            expected,
            actual,
        });
    }
    Ok(expected.map_or(1, |v| v + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn next_version_starts_at_one() {
        let w = VersionedWrite::new((), None, 0u8);
        assert_eq!(w.next_version(), 1);
        let w = VersionedWrite::new((), Some(4), 0u8);
        assert_eq!(w.next_version(), 5);
    }

    #[test]
    fn check_version_detects_conflicts() {
        assert_eq!(check_version("r", None, None).unwrap(), 1);
        assert_eq!(check_version("r", Some(2), Some(2)).unwrap(), 3);
        let err = check_version("r", Some(3), Some(2)).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            check_version("r", Some(1), None),
            Err(StorageError::VersionConflict { .. })
        ));
    }
}
