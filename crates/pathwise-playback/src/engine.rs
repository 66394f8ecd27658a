//! The playback engine facade.
//!
//! [`PlaybackEngine`] wires the services to a store, a content generator and
//! the background prefetch pool. Every per-learner write goes through the
//! same steps:
//!
//! 1. validate inputs against the immutable course (no lock, no I/O)
//! 2. lock the touched records with the [`KeyLockManager`]
//! 3. read, compute and commit with compare-and-swap, retrying on conflict
//! 4. release the locks, then publish events and schedule prefetch

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use pathwise_core::{
    Answer, ConceptId, ContentRef, Course, CourseId, CourseProgress, MisconceptionId, Node, NodeId,
    UserId,
};
use pathwise_engine::{Lookahead, ReviewCard};
use pathwise_storage::{
    ConceptKey, CourseSummary, InMemoryStore, PlaybackStore, ProgressKey, SqliteStore,
    VersionedWrite,
};

use crate::assets::{AssetKind, AssetPipeline, DeliveryMode, PrefetchQueue, PrefetchTicket};
use crate::catalog::CourseCatalog;
use crate::concurrency::{with_cas_retry, Backoff, KeyLockManager, LockKey, RetryPolicy};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::events::{EventBus, PlaybackEvent};
use crate::generation::{ContentGenerator, HttpContentGenerator, NullGenerator};
use crate::graph_service::{GraphService, Route, Transition};
use crate::interaction_service::{InteractionResult, InteractionService};
use crate::remediation_service::{RemediationContent, RemediationService};
use crate::review_service::{ReviewOutcome, ReviewService};

/// What the client shows after starting, resuming or moving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStep {
    pub course: CourseId,
    pub node_id: NodeId,
    pub node: Node,
    /// How the node was reached; `None` when nothing moved.
    pub route: Option<Route>,
    pub completed: bool,
    pub delivery: DeliveryMode,
    /// Content to show instead of the authored body on remediation nodes.
    pub remediation: Option<RemediationContent>,
    /// Prefetch generation queued for the nodes ahead.
    pub prefetch_generation: Option<u64>,
}

/// One concept of a learner summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSummary {
    pub concept: ConceptId,
    pub name: String,
    pub mastery: f64,
    pub confidence: f64,
    pub attempt_count: u32,
    pub next_review: Option<DateTime<Utc>>,
    pub lapse_count: u32,
    pub leech: bool,
}

/// A learner's standing in one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSummary {
    pub user: UserId,
    pub course: CourseId,
    pub progress: Option<CourseProgress>,
    pub concepts: Vec<ConceptSummary>,
    pub attempts: usize,
}

/// Adaptive course playback over a shared store.
pub struct PlaybackEngine {
    config: PlaybackConfig,
    store: Arc<dyn PlaybackStore>,
    catalog: CourseCatalog,
    graph: GraphService,
    interactions: InteractionService,
    remediation: RemediationService,
    reviews: ReviewService,
    assets: Arc<AssetPipeline>,
    prefetch: PrefetchQueue,
    locks: Arc<KeyLockManager>,
    retry: RetryPolicy,
    events: EventBus,
}

impl PlaybackEngine {
    /// Builds an engine and starts its background tasks. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: PlaybackConfig,
        store: Arc<dyn PlaybackStore>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let timeout = config.generation.timeout();
        let assets = Arc::new(AssetPipeline::new(
            Arc::clone(&generator),
            config.assets.clone(),
            timeout,
            events.clone(),
        ));
        let prefetch = PrefetchQueue::start(
            Arc::clone(&assets),
            config.assets.worker_count,
            config.assets.queue_capacity,
        );
        let locks = Arc::new(KeyLockManager::new());
        if config.concurrency.lock_prune_interval_secs > 0 {
            let interval = Duration::from_secs(config.concurrency.lock_prune_interval_secs);
            locks.start_prune_sweep(interval);
            assets.start_purge_sweep(interval);
        }

        PlaybackEngine {
            catalog: CourseCatalog::new(Arc::clone(&store)),
            graph: GraphService::new(config.navigation.clone(), config.remediation.clone()),
            interactions: InteractionService::new(
                config.navigation.clone(),
                config.mastery.clone(),
                config.review.clone(),
                config.celebration_threshold,
            ),
            remediation: RemediationService::new(
                generator,
                timeout,
                config.assets.max_attempts,
                Backoff::new(
                    Duration::from_millis(config.assets.backoff_base_ms),
                    Duration::from_millis(config.assets.backoff_max_ms),
                    config.assets.jitter_seed,
                ),
            ),
            reviews: ReviewService::new(config.review.clone()),
            retry: RetryPolicy::from_config(&config.concurrency, config.assets.jitter_seed),
            assets,
            prefetch,
            locks,
            events,
            store,
            config,
        }
    }

    /// Builds the store and generator named by `config`: SQLite when
    /// `db_path` is set, the HTTP generator when a base URL is set.
    pub fn from_config(config: PlaybackConfig) -> Result<Self, PlaybackError> {
        let store: Arc<dyn PlaybackStore> = match config.db_path.as_deref() {
            Some(path) => Arc::new(SqliteStore::new(path)?),
            None => Arc::new(InMemoryStore::new()),
        };
        let generator: Arc<dyn ContentGenerator> =
            match HttpContentGenerator::from_config(&config.generation) {
                Some(http) => Arc::new(http),
                None => {
                    tracing::info!("no generation backend configured, running text-only");
                    Arc::new(NullGenerator)
                }
            };
        Ok(PlaybackEngine::new(config, store, generator))
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PlaybackStore> {
        &self.store
    }

    pub fn assets(&self) -> &Arc<AssetPipeline> {
        &self.assets
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------
    // Courses
    // -------------------------------------------------------------------

    /// Validates and stores a course.
    pub fn load_course(&self, course: Course) -> Result<CourseId, PlaybackError> {
        self.catalog.load(course)
    }

    /// Validates and stores a course handed over as JSON.
    pub fn load_course_json(&self, json: &str) -> Result<CourseId, PlaybackError> {
        self.catalog.load_json(json)
    }

    pub fn course(&self, id: CourseId) -> Result<Arc<Course>, PlaybackError> {
        self.catalog.get(id)
    }

    pub fn list_courses(&self) -> Result<Vec<CourseSummary>, PlaybackError> {
        self.catalog.list()
    }

    /// Removes a course together with every learner record kept for it.
    pub fn remove_course(&self, course_id: CourseId) -> Result<(), PlaybackError> {
        self.catalog.remove(course_id)?;
        tracing::info!(course = %course_id, "course removed");
        Ok(())
    }

    /// Registers remediation content for a misconception of a course.
    pub fn register_remediation_template(
        &self,
        course_id: CourseId,
        misconception: MisconceptionId,
        content: ContentRef,
    ) -> Result<(), PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let m = course.misconception(misconception).ok_or_else(|| {
            PlaybackError::NotFound(format!(
                "misconception {} in course {}",
                misconception, course_id
            ))
        })?;
        self.remediation
            .register_template(course_id, m.concept, m.id, content);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------

    /// Opens a course for `user`, or resumes where they left off.
    pub async fn start_course(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<PlaybackStep, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let key = ProgressKey {
            user,
            course: course_id,
        };
        let progress = {
            let _guard = self.locks.acquire([LockKey::Progress(key)]).await;
            with_cas_retry(&self.retry, "start course", || {
                if let Some(existing) = self.store.load_progress(&key)? {
                    return Ok(existing.value);
                }
                let fresh = CourseProgress::start(user, course_id, course.entry(), Utc::now());
                self.store
                    .save_progress(&VersionedWrite::new(key, None, fresh.clone()))?;
                Ok(fresh)
            })
            .await?
        };
        tracing::info!(%user, course = %course_id, node = %progress.current_node, "course opened");
        self.step(&course, &progress, None, None, true)
    }

    /// The learner's current node.
    pub fn get_current_node(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<PlaybackStep, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let progress = self.progress(user, course_id)?;
        self.step(&course, &progress, None, None, false)
    }

    /// Moves the learner along the first matching edge.
    pub async fn advance(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<PlaybackStep, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let key = ProgressKey {
            user,
            course: course_id,
        };
        let (progress, transition, completed_now) = {
            let _guard = self.locks.acquire([LockKey::Progress(key)]).await;
            with_cas_retry(&self.retry, "advance", || {
                let stored = self.store.load_progress(&key)?.ok_or_else(|| not_started(&key))?;
                let mastery = self.mastery_map(user, course_id)?;
                let transition = self.graph.plan_advance(&course, &stored.value, mastery)?;
                self.apply_transition(&course, key, stored.version, stored.value, transition)
            })
            .await?
        };
        self.after_move(&course, &progress, transition, completed_now).await
    }

    /// Optional detours from the learner's current node.
    pub fn optional_branches(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<Vec<NodeId>, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let progress = self.progress(user, course_id)?;
        self.graph.optional_branches(&course, &progress)
    }

    /// Follows the optional edge to `target`.
    pub async fn take_optional(
        &self,
        user: UserId,
        course_id: CourseId,
        target: NodeId,
    ) -> Result<PlaybackStep, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let key = ProgressKey {
            user,
            course: course_id,
        };
        let (progress, transition, completed_now) = {
            let _guard = self.locks.acquire([LockKey::Progress(key)]).await;
            with_cas_retry(&self.retry, "detour", || {
                let stored = self.store.load_progress(&key)?.ok_or_else(|| not_started(&key))?;
                let transition = self.graph.plan_detour(&course, &stored.value, target)?;
                self.apply_transition(&course, key, stored.version, stored.value, transition)
            })
            .await?
        };
        self.after_move(&course, &progress, transition, completed_now).await
    }

    /// Predicts up to `n` upcoming nodes. Reads only.
    pub fn lookahead(
        &self,
        user: UserId,
        course_id: CourseId,
        n: usize,
    ) -> Result<Lookahead, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let progress = self.progress(user, course_id)?;
        let mastery = self.mastery_map(user, course_id)?;
        self.graph.lookahead(&course, &progress, mastery, n)
    }

    // -------------------------------------------------------------------
    // Interactions and reviews
    // -------------------------------------------------------------------

    /// Scores an answer and records it with the mastery and schedule
    /// updates it implies, atomically.
    pub async fn submit_interaction(
        &self,
        user: UserId,
        course_id: CourseId,
        node_id: NodeId,
        answer: Answer,
    ) -> Result<InteractionResult, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let eval = self.interactions.evaluate(&course, node_id, &answer)?;
        let node = course.require_node(node_id)?;

        let progress_key = ProgressKey {
            user,
            course: course_id,
        };
        let mut keys = vec![LockKey::Progress(progress_key)];
        keys.extend(node.concepts.iter().map(|&concept| {
            LockKey::Concept(ConceptKey {
                user,
                course: course_id,
                concept,
            })
        }));

        let attempt_id = Uuid::new_v4();
        let result = {
            let _guard = self.locks.acquire(keys).await;
            with_cas_retry(&self.retry, "submit interaction", || {
                let prepared = self.interactions.prepare(
                    self.store.as_ref(),
                    user,
                    course_id,
                    &course,
                    &eval,
                    attempt_id,
                    Utc::now(),
                )?;
                self.store.commit_interaction(&prepared.commit)?;
                Ok(prepared.result)
            })
            .await?
        };

        tracing::info!(
            %user,
            course = %course_id,
            node = %node_id,
            score = result.score,
            outcome = ?result.outcome,
            misconception = ?result.misconception,
            "interaction recorded"
        );
        if result.celebrate {
            self.events.publish(PlaybackEvent::Celebration {
                user,
                course: course_id,
                node: node_id,
                score: result.score,
            });
        }
        for leech in &result.leeches {
            self.publish_leech(user, course_id, leech.concept, leech.lapse_count);
        }
        Ok(result)
    }

    /// Applies a graded recall of `concept` (quality `0..=5`).
    pub async fn submit_review(
        &self,
        user: UserId,
        course_id: CourseId,
        concept: ConceptId,
        quality: u8,
    ) -> Result<ReviewOutcome, PlaybackError> {
        ReviewService::validate_quality(quality)?;
        let course = self.catalog.get(course_id)?;
        if course.concept(concept).is_none() {
            return Err(PlaybackError::NotFound(format!(
                "concept {} in course {}",
                concept, course_id
            )));
        }
        let key = ConceptKey {
            user,
            course: course_id,
            concept,
        };
        let outcome = {
            let _guard = self.locks.acquire([LockKey::Concept(key)]).await;
            with_cas_retry(&self.retry, "submit review", || {
                let (write, outcome) =
                    self.reviews
                        .prepare_review(self.store.as_ref(), key, quality, Utc::now())?;
                self.store.save_review(&write)?;
                Ok(outcome)
            })
            .await?
        };
        tracing::info!(
            %user,
            course = %course_id,
            concept = %concept,
            quality,
            interval_days = outcome.schedule.interval_days,
            "review recorded"
        );
        if outcome.became_leech {
            self.publish_leech(user, course_id, concept, outcome.schedule.lapse_count);
        }
        Ok(outcome)
    }

    /// Today's review queue; `max_items` defaults to the configured size.
    pub fn get_daily_queue(
        &self,
        user: UserId,
        max_items: Option<usize>,
    ) -> Result<Vec<ReviewCard>, PlaybackError> {
        self.get_daily_queue_at(user, Utc::now(), max_items)
    }

    /// The review queue as it would be at `now`.
    pub fn get_daily_queue_at(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        max_items: Option<usize>,
    ) -> Result<Vec<ReviewCard>, PlaybackError> {
        let max_items = max_items.unwrap_or(self.reviews.policy().default_queue_size);
        self.reviews
            .daily_queue(self.store.as_ref(), &self.catalog, user, now, max_items)
    }

    /// Progress, per-concept mastery and review state of `user` in a course.
    pub fn learner_summary(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<LearnerSummary, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let progress = self
            .store
            .load_progress(&ProgressKey {
                user,
                course: course_id,
            })?
            .map(|v| v.value);
        let mastery: HashMap<ConceptId, _> = self
            .store
            .mastery_for_course(user, course_id)?
            .into_iter()
            .map(|(concept, v)| (concept, v.value))
            .collect();

        let mut concepts = Vec::new();
        for concept in course.concepts() {
            let key = ConceptKey {
                user,
                course: course_id,
                concept: concept.id,
            };
            let state = mastery.get(&concept.id);
            let review = self.store.load_review(&key)?.map(|v| v.value);
            concepts.push(ConceptSummary {
                concept: concept.id,
                name: concept.name.clone(),
                mastery: state.map_or(0.0, |s| s.mastery),
                confidence: state.map_or(0.0, |s| s.confidence),
                attempt_count: state.map_or(0, |s| s.attempt_count),
                next_review: review.map(|r| r.due_at),
                lapse_count: review.map_or(0, |r| r.lapse_count),
                leech: review.is_some_and(|r| {
                    pathwise_engine::is_leech(&r, self.reviews.policy().leech_threshold)
                }),
            });
        }
        let attempts = self.store.attempts_for(user, course_id)?.len();
        Ok(LearnerSummary {
            user,
            course: course_id,
            progress,
            concepts,
            attempts,
        })
    }

    // -------------------------------------------------------------------
    // Assets
    // -------------------------------------------------------------------

    /// Whether a node is currently delivered with assets or text-only.
    pub fn delivery_mode(
        &self,
        course_id: CourseId,
        node_id: NodeId,
    ) -> Result<DeliveryMode, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let node = course.require_node(node_id)?;
        Ok(self.assets.delivery_mode(node_id, node))
    }

    /// Cached assets of a node.
    pub fn node_assets(
        &self,
        course_id: CourseId,
        node_id: NodeId,
    ) -> Result<Vec<(AssetKind, Arc<Vec<u8>>)>, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let node = course.require_node(node_id)?;
        Ok(self.assets.assets_for(node_id, node))
    }

    /// Queues a prefetch of the current node and the configured number of
    /// nodes ahead, superseding any earlier generation for the learner.
    pub fn prefetch_ahead(
        &self,
        user: UserId,
        course_id: CourseId,
    ) -> Result<Option<PrefetchTicket>, PlaybackError> {
        let course = self.catalog.get(course_id)?;
        let progress = self.progress(user, course_id)?;
        Ok(self.submit_prefetch(&course, &progress))
    }

    /// The queued or running prefetch generation of a learner, if any.
    pub fn prefetch_generation(&self, user: UserId, course: CourseId) -> Option<u64> {
        self.prefetch
            .current_generation(&ProgressKey { user, course })
    }

    /// Cancels the learner's queued or running prefetch, e.g. when the
    /// session ends.
    pub fn cancel_prefetch(&self, user: UserId, course: CourseId) {
        self.prefetch.cancel(&ProgressKey { user, course });
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn progress(&self, user: UserId, course: CourseId) -> Result<CourseProgress, PlaybackError> {
        let key = ProgressKey { user, course };
        self.store
            .load_progress(&key)?
            .map(|v| v.value)
            .ok_or_else(|| not_started(&key))
    }

    fn mastery_map(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<HashMap<ConceptId, f64>, PlaybackError> {
        Ok(self
            .store
            .mastery_for_course(user, course)?
            .into_iter()
            .map(|(concept, v)| (concept, v.value.mastery))
            .collect())
    }

    fn apply_transition(
        &self,
        course: &Course,
        key: ProgressKey,
        version: u64,
        mut progress: CourseProgress,
        transition: Transition,
    ) -> Result<(CourseProgress, Transition, bool), PlaybackError> {
        let was_completed = progress.completed;
        let completed_now = self
            .graph
            .apply(course, &mut progress, &transition, Utc::now());
        if transition.route != Route::Stay || progress.completed != was_completed {
            self.store
                .save_progress(&VersionedWrite::new(key, Some(version), progress.clone()))?;
        }
        Ok((progress, transition, completed_now))
    }

    async fn after_move(
        &self,
        course: &Arc<Course>,
        progress: &CourseProgress,
        transition: Transition,
        completed_now: bool,
    ) -> Result<PlaybackStep, PlaybackError> {
        tracing::info!(
            user = %progress.user,
            course = %progress.course,
            from = %transition.from,
            to = %transition.to,
            route = ?transition.route,
            "advanced"
        );
        if completed_now {
            self.events.publish(PlaybackEvent::CourseCompleted {
                user: progress.user,
                course: progress.course,
            });
        }
        let remediation = match transition.route {
            Route::Remediation { hop } => Some(
                self.remediation
                    .generate_remediation(
                        progress.course,
                        course,
                        transition.to,
                        progress.active_misconception,
                        hop,
                    )
                    .await?,
            ),
            _ => None,
        };
        self.step(
            course,
            progress,
            Some(transition.route),
            remediation,
            transition.route != Route::Stay,
        )
    }

    fn step(
        &self,
        course: &Arc<Course>,
        progress: &CourseProgress,
        route: Option<Route>,
        remediation: Option<RemediationContent>,
        prefetch: bool,
    ) -> Result<PlaybackStep, PlaybackError> {
        let node = self.graph.get_current_node(course, progress)?;
        let prefetch_generation = if prefetch {
            self.submit_prefetch(course, progress).map(|t| t.generation)
        } else {
            None
        };
        Ok(PlaybackStep {
            course: progress.course,
            node_id: progress.current_node,
            node: node.clone(),
            route,
            completed: progress.completed,
            delivery: self.assets.delivery_mode(progress.current_node, node),
            remediation,
            prefetch_generation,
        })
    }

    fn submit_prefetch(
        &self,
        course: &Arc<Course>,
        progress: &CourseProgress,
    ) -> Option<PrefetchTicket> {
        let depth = self.config.assets.prefetch_depth;
        let mut nodes = vec![progress.current_node];
        if depth > 0 {
            let ahead = self
                .mastery_map(progress.user, progress.course)
                .and_then(|mastery| self.graph.lookahead(course, progress, mastery, depth));
            match ahead {
                Ok(ahead) => nodes.extend(ahead.nodes),
                Err(err) => {
                    tracing::warn!(error = %err, "lookahead for prefetch failed");
                }
            }
        }
        let key = ProgressKey {
            user: progress.user,
            course: progress.course,
        };
        self.prefetch.submit(key, Arc::clone(course), nodes)
    }

    fn publish_leech(&self, user: UserId, course: CourseId, concept: ConceptId, lapse_count: u32) {
        tracing::info!(%user, %course, %concept, lapse_count, "concept became a leech");
        self.events.publish(PlaybackEvent::LeechDetected {
            user,
            course,
            concept,
            lapse_count,
        });
    }
}

fn not_started(key: &ProgressKey) -> PlaybackError {
    PlaybackError::NotFound(format!("no progress for {}", key))
}
