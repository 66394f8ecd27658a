//! Adaptive course playback for pathwise.
//!
//! [`PlaybackEngine`] serves many learners at once over one shared course
//! catalog. It walks the course graph according to answers and mastery,
//! scores interactions, schedules spaced reviews, picks remediation content
//! and prefetches narration and illustration assets ahead of the learner.
//!
//! # Modules
//!
//! - [`engine`]: the facade tying the services to a store
//! - [`catalog`]: validated, cached courses
//! - [`graph_service`]: navigation over a learner's progress
//! - [`interaction_service`]: scoring and record updates for answers
//! - [`remediation_service`]: content for remediation nodes
//! - [`review_service`]: SM-2 reviews and the daily queue
//! - [`assets`]: asset cache, generation pipeline, prefetch pool
//! - [`concurrency`]: per-key locks and compare-and-swap retry
//! - [`generation`]: the content generator seam and its HTTP client
//! - [`events`]: broadcast of celebrations, leeches, completions
//! - [`config`]: policies and environment overrides
//! - [`telemetry`]: tracing subscriber setup

pub mod assets;
pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod generation;
pub mod graph_service;
pub mod interaction_service;
pub mod remediation_service;
pub mod review_service;
pub mod telemetry;

pub use assets::{AssetKind, AssetStatus, DeliveryMode, PrefetchReport, PrefetchTicket};
pub use config::{AssetPolicy, ConcurrencyPolicy, GenerationConfig, PlaybackConfig, RemediationPolicy};
pub use engine::{ConceptSummary, LearnerSummary, PlaybackEngine, PlaybackStep};
pub use error::PlaybackError;
pub use events::{EventBus, PlaybackEvent};
pub use generation::{ContentGenerator, GenerationError, HttpContentGenerator, NullGenerator};
pub use graph_service::{GraphService, Route, Transition};
pub use interaction_service::{ConceptMastery, InteractionResult, LeechAlert};
pub use remediation_service::{RemediationContent, RemediationSource};
pub use review_service::ReviewOutcome;
