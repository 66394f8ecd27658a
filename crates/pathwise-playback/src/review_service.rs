//! Spaced-repetition reviews and the daily queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pathwise_core::{ConceptId, CourseId, ReviewSchedule, UserId};
use pathwise_engine::{
    build_daily_queue, is_leech, schedule_review, DueConcept, EngineError, ReviewCard,
    ReviewPolicy,
};
use pathwise_engine::sm2::MAX_QUALITY;
use pathwise_storage::{ConceptKey, PlaybackStore, VersionedWrite};

use crate::catalog::CourseCatalog;
use crate::error::PlaybackError;
use crate::interaction_service::crossed_leech;

/// Result of one graded review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub course: CourseId,
    pub concept: ConceptId,
    pub schedule: ReviewSchedule,
    pub leech: bool,
    /// This review pushed the concept over the leech threshold.
    pub became_leech: bool,
}

/// SM-2 bookkeeping bound to a [`ReviewPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ReviewService {
    policy: ReviewPolicy,
}

impl ReviewService {
    pub fn new(policy: ReviewPolicy) -> Self {
        ReviewService { policy }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    /// Rejects grades outside `0..=5` before anything is read.
    pub fn validate_quality(quality: u8) -> Result<(), PlaybackError> {
        if quality > MAX_QUALITY {
            return Err(EngineError::QualityOutOfRange { quality }.into());
        }
        Ok(())
    }

    /// Builds the write for one graded review. A concept without a schedule
    /// starts from a fresh one.
    pub fn prepare_review(
        &self,
        store: &dyn PlaybackStore,
        key: ConceptKey,
        quality: u8,
        now: DateTime<Utc>,
    ) -> Result<(VersionedWrite<ConceptKey, ReviewSchedule>, ReviewOutcome), PlaybackError> {
        let stored = store.load_review(&key)?;
        let before = stored
            .as_ref()
            .map(|v| v.value)
            .unwrap_or_else(|| ReviewSchedule::fresh(now));
        let next = schedule_review(&before, quality, now)?;
        let outcome = ReviewOutcome {
            course: key.course,
            concept: key.concept,
            schedule: next,
            leech: is_leech(&next, self.policy.leech_threshold),
            became_leech: crossed_leech(Some(&before), &next, self.policy.leech_threshold),
        };
        Ok((
            VersionedWrite::new(key, stored.map(|v| v.version), next),
            outcome,
        ))
    }

    /// Today's interleaved review queue for `user` across every course.
    pub fn daily_queue(
        &self,
        store: &dyn PlaybackStore,
        catalog: &CourseCatalog,
        user: UserId,
        now: DateTime<Utc>,
        max_items: usize,
    ) -> Result<Vec<ReviewCard>, PlaybackError> {
        let mut candidates = Vec::new();
        for (key, schedule) in store.reviews_for_user(user)? {
            if !schedule.value.is_due(now) {
                continue;
            }
            let course = match catalog.get(key.course) {
                Ok(course) => course,
                Err(PlaybackError::NotFound(reason)) => {
                    tracing::warn!(course = %key.course, %reason, "skipping reviews of missing course");
                    continue;
                }
                Err(err) => return Err(err),
            };
            candidates.push(DueConcept {
                course: key.course,
                concept: key.concept,
                schedule: schedule.value,
                review_nodes: course.review_nodes_for(key.concept),
            });
        }
        let queue = build_daily_queue(candidates, now, max_items, &self.policy);
        tracing::debug!(user = %user, cards = queue.len(), "built daily review queue");
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pathwise_core::{ContentRef, CourseBuilder, CourseMeta, Node, NodeKind};
    use pathwise_storage::{InMemoryStore, LearnerStore};
    use std::sync::Arc;

    #[test]
    fn out_of_range_quality_is_rejected() {
        assert!(ReviewService::validate_quality(5).is_ok());
        assert!(matches!(
            ReviewService::validate_quality(6),
            Err(PlaybackError::InteractionValidation(
                EngineError::QualityOutOfRange { quality: 6 }
            ))
        ));
    }

    #[test]
    fn queue_spans_courses_and_skips_future_reviews() {
        let store = Arc::new(InMemoryStore::new());
        let catalog = CourseCatalog::new(store.clone());
        let user = UserId::new_v4();
        let now = Utc::now();

        let mut ids = Vec::new();
        for title in ["Rivers", "Mountains"] {
            let mut b = CourseBuilder::new(CourseMeta {
                title: title.into(),
                ..CourseMeta::default()
            });
            let concept = b.add_concept(title.to_lowercase());
            let start = b.add_node(Node::new(NodeKind::Hook, ContentRef::text(title, "b")));
            let end = b.add_node(
                Node::new(NodeKind::Summary, ContentRef::text("end", "b")).with_concept(concept),
            );
            b.connect(start, end).unwrap();
            ids.push((catalog.load(b.build().unwrap()).unwrap(), concept));
        }

        for (i, (course, concept)) in ids.iter().enumerate() {
            let mut schedule = ReviewSchedule::fresh(now);
            schedule.due_at = now - Duration::hours(10 - i as i64);
            let key = ConceptKey {
                user,
                course: *course,
                concept: *concept,
            };
            store
                .save_review(&VersionedWrite::new(key, None, schedule))
                .unwrap();
        }
        let later = ConceptKey {
            user,
            course: ids[0].0,
            concept: ConceptId(7),
        };
        store
            .save_review(&VersionedWrite::new(later, None, ReviewSchedule::fresh(now)))
            .unwrap();

        let service = ReviewService::default();
        let queue = service
            .daily_queue(store.as_ref(), &catalog, user, now, 10)
            .unwrap();
        // No review nodes: one concept card each, most overdue first.
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].course, ids[0].0);
        assert_eq!(queue[1].course, ids[1].0);
        assert!(queue.iter().all(|c| c.node.is_none()));
    }

    #[test]
    fn missing_schedule_starts_fresh() {
        let store = InMemoryStore::new();
        let mut b = CourseBuilder::new(CourseMeta::default());
        let concept = b.add_concept("tides");
        b.add_node(Node::new(NodeKind::Summary, ContentRef::text("end", "b")));
        let course = pathwise_storage::CourseStore::save_course(&store, &b.build().unwrap())
            .unwrap();
        let key = ConceptKey {
            user: UserId::new_v4(),
            course,
            concept,
        };
        let now = Utc::now();
        let (write, outcome) = ReviewService::default()
            .prepare_review(&store, key, 5, now)
            .unwrap();
        assert_eq!(write.expected, None);
        assert_eq!(outcome.schedule.interval_days, 3);
        assert!(!outcome.became_leech);
    }
}
