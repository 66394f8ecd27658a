//! Scoring answers and turning them into learner record writes.
//!
//! [`InteractionService::evaluate`] is pure and runs before any lock is
//! taken, so a rejected answer never touches storage.
//! [`InteractionService::prepare`] reads the current records and builds one
//! [`InteractionCommit`]; the caller commits it and re-prepares on a version
//! conflict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pathwise_core::{
    Answer, ConceptId, Course, CourseId, InteractionAttempt, MasteryState, MisconceptionId, Node,
    NodeId, NodeKind, Outcome, ReviewSchedule, UserId,
};
use pathwise_engine::misconception::detect;
use pathwise_engine::{
    is_leech, quality_from_score, schedule_review, score_answer, update_mastery, validate_answer,
    MasteryPolicy, NavigationPolicy, ReviewPolicy,
};
use pathwise_storage::{
    ConceptKey, InteractionCommit, PlaybackStore, ProgressKey, VersionedWrite,
};

use crate::error::PlaybackError;

/// A scored, not yet recorded, answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub node: NodeId,
    pub score: f64,
    pub outcome: Outcome,
    pub misconception: Option<MisconceptionId>,
    pub hint: Option<String>,
}

/// Mastery of one concept after an answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConceptMastery {
    pub concept: ConceptId,
    pub mastery: f64,
    pub confidence: f64,
}

/// A concept that crossed the leech threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeechAlert {
    pub concept: ConceptId,
    pub lapse_count: u32,
}

/// What the learner gets back for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResult {
    pub attempt_id: Uuid,
    pub node: NodeId,
    pub score: f64,
    pub outcome: Outcome,
    pub correct: bool,
    pub misconception: Option<MisconceptionId>,
    /// Corrective hint of the detected misconception.
    pub hint: Option<String>,
    pub mastery: Vec<ConceptMastery>,
    /// The score crossed the celebration threshold.
    pub celebrate: bool,
    pub leeches: Vec<LeechAlert>,
    /// The answer was on the learner's current node and will steer the next
    /// advance.
    pub steers_navigation: bool,
}

/// An [`InteractionCommit`] plus the result it produces once committed.
#[derive(Debug, Clone)]
pub struct PreparedInteraction {
    pub commit: InteractionCommit,
    pub result: InteractionResult,
}

/// Answer scoring and mastery bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct InteractionService {
    navigation: NavigationPolicy,
    mastery: MasteryPolicy,
    review: ReviewPolicy,
    celebration_threshold: f64,
}

impl InteractionService {
    pub fn new(
        navigation: NavigationPolicy,
        mastery: MasteryPolicy,
        review: ReviewPolicy,
        celebration_threshold: f64,
    ) -> Self {
        InteractionService {
            navigation,
            mastery,
            review,
            celebration_threshold,
        }
    }

    /// Validates and scores `answer` on `node_id`.
    pub fn evaluate(
        &self,
        course: &Course,
        node_id: NodeId,
        answer: &Answer,
    ) -> Result<Evaluation, PlaybackError> {
        let node = course
            .node(node_id)
            .ok_or_else(|| PlaybackError::NotFound(format!("node {}", node_id)))?;
        let key = validate_answer(node_id, node, answer)?;
        let score = score_answer(key, answer)?;
        let misconception = detect(course, node, answer, score);
        let outcome = self.navigation.outcome(score, misconception.is_some());
        Ok(Evaluation {
            node: node_id,
            score,
            outcome,
            misconception: misconception.map(|m| m.id),
            hint: misconception.map(|m| m.hint.clone()),
        })
    }

    /// Reads the learner's records and builds the writes for `eval`.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        &self,
        store: &dyn PlaybackStore,
        user: UserId,
        course_id: CourseId,
        course: &Course,
        eval: &Evaluation,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PreparedInteraction, PlaybackError> {
        let node = course.require_node(eval.node)?;
        let concepts: Vec<ConceptId> = node.concepts.iter().copied().collect();
        let weight = self.mastery.evidence_weight(node.kind, node.difficulty);

        let mut mastery_writes = Vec::with_capacity(concepts.len());
        let mut review_writes = Vec::new();
        let mut mastery = Vec::with_capacity(concepts.len());
        let mut leeches = Vec::new();

        for &concept in &concepts {
            let key = ConceptKey {
                user,
                course: course_id,
                concept,
            };

            let stored = store.load_mastery(&key)?;
            let prior = stored
                .as_ref()
                .map(|v| v.value)
                .unwrap_or_else(|| MasteryState::fresh(now));
            let next = update_mastery(
                &prior,
                eval.score,
                weight,
                self.mastery.confidence_increment,
                now,
            );
            mastery.push(ConceptMastery {
                concept,
                mastery: next.mastery,
                confidence: next.confidence,
            });
            mastery_writes.push(VersionedWrite::new(key, stored.map(|v| v.version), next));

            let review = store.load_review(&key)?;
            if let Some(write) =
                self.review_write(node, key, review.as_ref().map(|v| (v.value, v.version)), eval, now)?
            {
                if crossed_leech(
                    review.as_ref().map(|v| &v.value),
                    &write.value,
                    self.review.leech_threshold,
                ) {
                    leeches.push(LeechAlert {
                        concept,
                        lapse_count: write.value.lapse_count,
                    });
                }
                review_writes.push(write);
            }
        }

        let progress_key = ProgressKey {
            user,
            course: course_id,
        };
        let progress = match store.load_progress(&progress_key)? {
            Some(stored)
                if stored.value.current_node == eval.node && !stored.value.completed =>
            {
                let mut next = stored.value;
                next.last_outcome = Some(eval.outcome);
                next.active_misconception = eval.misconception;
                next.updated_at = now;
                Some(VersionedWrite::new(progress_key, Some(stored.version), next))
            }
            _ => None,
        };

        let correct = eval.outcome == Outcome::Pass;
        let result = InteractionResult {
            attempt_id,
            node: eval.node,
            score: eval.score,
            outcome: eval.outcome,
            correct,
            misconception: eval.misconception,
            hint: eval.hint.clone(),
            mastery,
            celebrate: correct && eval.score >= self.celebration_threshold,
            leeches,
            steers_navigation: progress.is_some(),
        };
        let attempt = InteractionAttempt {
            id: attempt_id,
            user,
            course: course_id,
            node: eval.node,
            concepts,
            score: eval.score,
            outcome: eval.outcome,
            misconception: eval.misconception,
            answered_at: now,
        };

        Ok(PreparedInteraction {
            commit: InteractionCommit {
                mastery: mastery_writes,
                reviews: review_writes,
                progress,
                attempt,
            },
            result,
        })
    }

    /// Review-node answers are graded SM-2 reviews; any other first answer
    /// seeds a schedule due tomorrow.
    fn review_write(
        &self,
        node: &Node,
        key: ConceptKey,
        stored: Option<(ReviewSchedule, u64)>,
        eval: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<Option<VersionedWrite<ConceptKey, ReviewSchedule>>, PlaybackError> {
        let version = stored.map(|(_, v)| v);
        if node.kind == NodeKind::Review {
            let base = stored
                .map(|(s, _)| s)
                .unwrap_or_else(|| ReviewSchedule::fresh(now));
            let next = schedule_review(&base, quality_from_score(eval.score), now)?;
            return Ok(Some(VersionedWrite::new(key, version, next)));
        }
        Ok(match stored {
            Some(_) => None,
            None => Some(VersionedWrite::new(key, None, ReviewSchedule::fresh(now))),
        })
    }
}

/// `true` when `after` is a leech and `before` was not.
pub(crate) fn crossed_leech(
    before: Option<&ReviewSchedule>,
    after: &ReviewSchedule,
    threshold: u32,
) -> bool {
    is_leech(after, threshold) && !before.map(|s| is_leech(s, threshold)).unwrap_or(false)
}
