//! In-memory implementation of the storage traits.
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! sessions. It keeps everything in maps behind one mutex, with the same
//! compare-and-swap semantics as the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use pathwise_core::course::Course;
use pathwise_core::id::{ConceptId, CourseId, UserId};
use pathwise_core::learner::{CourseProgress, InteractionAttempt, MasteryState, ReviewSchedule};

use crate::error::StorageError;
use crate::hash::course_fingerprint;
use crate::traits::{CourseStore, LearnerStore};
use crate::types::{
    check_version, ConceptKey, CourseSummary, InteractionCommit, ProgressKey, Versioned,
    VersionedWrite,
};

#[derive(Debug, Clone)]
struct StoredCourse {
    course: Course,
    fingerprint: String,
}

#[derive(Debug, Default)]
struct Inner {
    courses: BTreeMap<CourseId, StoredCourse>,
    next_course_id: i64,
    mastery: HashMap<ConceptKey, Versioned<MasteryState>>,
    reviews: HashMap<ConceptKey, Versioned<ReviewSchedule>>,
    progress: HashMap<ProgressKey, Versioned<CourseProgress>>,
    attempts: Vec<InteractionAttempt>,
}

impl Inner {
    fn require_course(&self, id: CourseId) -> Result<(), StorageError> {
        if self.courses.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::CourseNotFound(id))
        }
    }
}

/// Map-backed store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn put<K, T>(
    map: &mut HashMap<K, Versioned<T>>,
    write: &VersionedWrite<K, T>,
) -> Result<u64, StorageError>
where
    K: Copy + Eq + Hash + fmt::Display,
    T: Clone,
{
    let actual = map.get(&write.key).map(|v| v.version);
    let version = check_version(write.key, actual, write.expected)?;
    map.insert(
        write.key,
        Versioned {
            value: write.value.clone(),
            version,
        },
    );
    Ok(version)
}

impl CourseStore for InMemoryStore {
    fn save_course(&self, course: &Course) -> Result<CourseId, StorageError> {
        let fingerprint = course_fingerprint(course)?.to_hex().to_string();
        let mut inner = self.lock()?;
        if let Some((id, _)) = inner
            .courses
            .iter()
            .find(|(_, stored)| stored.fingerprint == fingerprint)
        {
            return Ok(*id);
        }
        inner.next_course_id += 1;
        let id = CourseId(inner.next_course_id);
        inner.courses.insert(
            id,
            StoredCourse {
                course: course.clone(),
                fingerprint,
            },
        );
        Ok(id)
    }

    fn load_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let inner = self.lock()?;
        inner
            .courses
            .get(&id)
            .map(|stored| stored.course.clone())
            .ok_or(StorageError::CourseNotFound(id))
    }

    fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.require_course(id)?;
        inner.courses.remove(&id);
        inner.mastery.retain(|k, _| k.course != id);
        inner.reviews.retain(|k, _| k.course != id);
        inner.progress.retain(|k, _| k.course != id);
        inner.attempts.retain(|a| a.course != id);
        Ok(())
    }

    fn list_courses(&self) -> Result<Vec<CourseSummary>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .courses
            .iter()
            .map(|(id, stored)| CourseSummary {
                id: *id,
                title: stored.course.meta().title.clone(),
                fingerprint: stored.fingerprint.clone(),
            })
            .collect())
    }
}

impl LearnerStore for InMemoryStore {
    fn load_mastery(
        &self,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<MasteryState>>, StorageError> {
        Ok(self.lock()?.mastery.get(key).cloned())
    }

    fn save_mastery(
        &self,
        write: &VersionedWrite<ConceptKey, MasteryState>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.lock()?;
        inner.require_course(write.key.course)?;
        put(&mut inner.mastery, write)
    }

    fn mastery_for_course(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<(ConceptId, Versioned<MasteryState>)>, StorageError> {
        let inner = self.lock()?;
        let mut found: Vec<(ConceptId, Versioned<MasteryState>)> = inner
            .mastery
            .iter()
            .filter(|(k, _)| k.user == user && k.course == course)
            .map(|(k, v)| (k.concept, v.clone()))
            .collect();
        found.sort_by_key(|(concept, _)| *concept);
        Ok(found)
    }

    fn load_review(
        &self,
        key: &ConceptKey,
    ) -> Result<Option<Versioned<ReviewSchedule>>, StorageError> {
        Ok(self.lock()?.reviews.get(key).cloned())
    }

    fn save_review(
        &self,
        write: &VersionedWrite<ConceptKey, ReviewSchedule>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.lock()?;
        inner.require_course(write.key.course)?;
        put(&mut inner.reviews, write)
    }

    fn reviews_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<(ConceptKey, Versioned<ReviewSchedule>)>, StorageError> {
        let inner = self.lock()?;
        let mut found: Vec<(ConceptKey, Versioned<ReviewSchedule>)> = inner
            .reviews
            .iter()
            .filter(|(k, _)| k.user == user)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        found.sort_by_key(|(k, _)| *k);
        Ok(found)
    }

    fn load_progress(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<Versioned<CourseProgress>>, StorageError> {
        Ok(self.lock()?.progress.get(key).cloned())
    }

    fn save_progress(
        &self,
        write: &VersionedWrite<ProgressKey, CourseProgress>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.lock()?;
        inner.require_course(write.key.course)?;
        put(&mut inner.progress, write)
    }

    fn commit_interaction(&self, commit: &InteractionCommit) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.require_course(commit.attempt.course)?;
        commit.check_distinct_keys()?;

        // Check every precondition before touching anything.
        for w in &commit.mastery {
            let actual = inner.mastery.get(&w.key).map(|v| v.version);
            check_version(w.key, actual, w.expected)?;
        }
        for w in &commit.reviews {
            let actual = inner.reviews.get(&w.key).map(|v| v.version);
            check_version(w.key, actual, w.expected)?;
        }
        if let Some(w) = &commit.progress {
            let actual = inner.progress.get(&w.key).map(|v| v.version);
            check_version(w.key, actual, w.expected)?;
        }

        for w in &commit.mastery {
            put(&mut inner.mastery, w)?;
        }
        for w in &commit.reviews {
            put(&mut inner.reviews, w)?;
        }
        if let Some(w) = &commit.progress {
            put(&mut inner.progress, w)?;
        }
        inner.attempts.push(commit.attempt.clone());
        Ok(())
    }

    fn attempts_for(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Vec<InteractionAttempt>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.user == user && a.course == course)
            .cloned()
            .collect())
    }
}
