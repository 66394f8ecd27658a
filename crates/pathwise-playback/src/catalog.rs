//! Loaded courses, shared read-only across learners.

use std::sync::Arc;

use dashmap::DashMap;

use pathwise_core::{validate, Course, CourseId};
use pathwise_storage::{CourseSummary, PlaybackStore};

use crate::error::PlaybackError;

/// Cache of immutable courses in front of the course store.
pub struct CourseCatalog {
    courses: DashMap<CourseId, Arc<Course>>,
    store: Arc<dyn PlaybackStore>,
}

impl CourseCatalog {
    pub fn new(store: Arc<dyn PlaybackStore>) -> Self {
        CourseCatalog {
            courses: DashMap::new(),
            store,
        }
    }

    /// Re-validates `course`, persists it and caches it.
    ///
    /// Loading a course identical to a stored one returns the existing id.
    pub fn load(&self, course: Course) -> Result<CourseId, PlaybackError> {
        let violations = validate(&course);
        if !violations.is_empty() {
            tracing::warn!(
                title = %course.meta().title,
                count = violations.len(),
                "rejecting course with integrity violations"
            );
            return Err(PlaybackError::GraphIntegrity {
                reason: format!("course '{}' failed validation", course.meta().title),
                violations,
            });
        }
        let id = self.store.save_course(&course)?;
        tracing::info!(
            course = %id,
            title = %course.meta().title,
            nodes = course.node_count(),
            "course loaded"
        );
        self.courses.insert(id, Arc::new(course));
        Ok(id)
    }

    /// Parses a course handed over as JSON, then loads it.
    pub fn load_json(&self, json: &str) -> Result<CourseId, PlaybackError> {
        let course = Course::from_json(json)?;
        self.load(course)
    }

    /// Returns the course, reading it from the store on a cache miss.
    pub fn get(&self, id: CourseId) -> Result<Arc<Course>, PlaybackError> {
        if let Some(course) = self.courses.get(&id) {
            return Ok(Arc::clone(course.value()));
        }
        let course = Arc::new(self.store.load_course(id)?);
        let entry = self.courses.entry(id).or_insert(course);
        Ok(Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Result<Vec<CourseSummary>, PlaybackError> {
        Ok(self.store.list_courses()?)
    }

    /// Drops the course from the cache and the store, with its learner
    /// records.
    pub fn remove(&self, id: CourseId) -> Result<(), PlaybackError> {
        self.courses.remove(&id);
        self.store.delete_course(id)?;
        Ok(())
    }
}
