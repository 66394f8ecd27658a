//! Engine configuration.
//!
//! [`PlaybackConfig`] groups every tunable policy. Defaults match the
//! documented behaviour; a JSON file may override any subset of fields and
//! `PATHWISE_*` environment variables override the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pathwise_engine::{MasteryPolicy, NavigationPolicy, ReviewPolicy};

use crate::error::PlaybackError;

/// Bounds on remediation chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationPolicy {
    /// Remediation nodes a learner may enter before being routed to a
    /// non-remediation fallback.
    pub max_remediation_hops: u32,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        RemediationPolicy {
            max_remediation_hops: 2,
        }
    }
}

impl RemediationPolicy {
    /// Returns `true` when a chain of `hops` may not grow any further.
    pub fn exhausted(&self, hops: u32) -> bool {
        hops >= self.max_remediation_hops
    }
}

/// Asset prefetching and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPolicy {
    /// Nodes past the current one kept warm.
    pub prefetch_depth: usize,
    /// Concurrent generation calls.
    pub max_parallelism: usize,
    /// Generation attempts per asset before degrading.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub audio_ttl_secs: u64,
    pub image_ttl_secs: u64,
    /// How long a degraded node stays text-only.
    pub degraded_cooldown_secs: u64,
    /// Background prefetch workers.
    pub worker_count: usize,
    /// Pending prefetch jobs before new ones are dropped.
    pub queue_capacity: usize,
    /// Seed for backoff jitter; fixed seeds make retry timing reproducible.
    pub jitter_seed: u64,
}

impl Default for AssetPolicy {
    fn default() -> Self {
        AssetPolicy {
            prefetch_depth: 3,
            max_parallelism: 4,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            audio_ttl_secs: 24 * 60 * 60,
            image_ttl_secs: 72 * 60 * 60,
            degraded_cooldown_secs: 10 * 60,
            worker_count: 2,
            queue_capacity: 64,
            jitter_seed: 0x5eed,
        }
    }
}

impl AssetPolicy {
    pub fn audio_ttl(&self) -> Duration {
        Duration::from_secs(self.audio_ttl_secs)
    }

    pub fn image_ttl(&self) -> Duration {
        Duration::from_secs(self.image_ttl_secs)
    }

    pub fn degraded_cooldown(&self) -> Duration {
        Duration::from_secs(self.degraded_cooldown_secs)
    }
}

/// Compare-and-swap retry behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyPolicy {
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Idle per-key locks are pruned on this interval.
    pub lock_prune_interval_secs: u64,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy {
            max_retries: 5,
            retry_base_ms: 5,
            retry_max_ms: 200,
            lock_prune_interval_secs: 60,
        }
    }
}

/// Content generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible API root. Without it generation is disabled.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub text_model: String,
    pub speech_model: String,
    pub image_model: String,
    /// Applied to every generation call.
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            base_url: None,
            api_key: None,
            text_model: "gpt-4o-mini".to_string(),
            speech_model: "tts-1".to_string(),
            image_model: "dall-e-3".to_string(),
            timeout_ms: 15_000,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// SQLite database path. In-memory storage when absent.
    pub db_path: Option<String>,
    pub navigation: NavigationPolicy,
    pub mastery: MasteryPolicy,
    pub review: ReviewPolicy,
    pub remediation: RemediationPolicy,
    pub assets: AssetPolicy,
    pub concurrency: ConcurrencyPolicy,
    pub generation: GenerationConfig,
    /// Scores at or above this on a correct answer raise a celebration.
    pub celebration_threshold: f64,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            db_path: None,
            navigation: NavigationPolicy::default(),
            mastery: MasteryPolicy::default(),
            review: ReviewPolicy::default(),
            remediation: RemediationPolicy::default(),
            assets: AssetPolicy::default(),
            concurrency: ConcurrencyPolicy::default(),
            generation: GenerationConfig::default(),
            celebration_threshold: 0.9,
            event_capacity: 256,
        }
    }
}

impl PlaybackConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, PlaybackError> {
        serde_json::from_str(json).map_err(|e| PlaybackError::Config(e.to_string()))
    }

    /// Reads a JSON file, then applies environment overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlaybackError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlaybackError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)?.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, PlaybackError> {
        PlaybackConfig::default().with_env_overrides()
    }

    /// Applies `PATHWISE_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, PlaybackError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PlaybackError> {
        if let Some(path) = lookup("PATHWISE_DB_PATH") {
            self.db_path = Some(path);
        }
        if let Some(hops) = parse_var(&lookup, "PATHWISE_MAX_REMEDIATION_HOPS")? {
            self.remediation.max_remediation_hops = hops;
        }
        if let Some(depth) = parse_var(&lookup, "PATHWISE_PREFETCH_DEPTH")? {
            self.assets.prefetch_depth = depth;
        }
        if let Some(parallelism) = parse_var::<usize>(&lookup, "PATHWISE_ASSET_PARALLELISM")? {
            if parallelism == 0 {
                return Err(PlaybackError::Config(
                    "PATHWISE_ASSET_PARALLELISM must be at least 1".to_string(),
                ));
            }
            self.assets.max_parallelism = parallelism;
        }
        if let Some(timeout) = parse_var(&lookup, "PATHWISE_GENERATION_TIMEOUT_MS")? {
            self.generation.timeout_ms = timeout;
        }
        if let Some(url) = lookup("PATHWISE_GENERATION_BASE_URL") {
            self.generation.base_url = Some(url);
        }
        if let Some(key) = lookup("PATHWISE_GENERATION_API_KEY") {
            self.generation.api_key = Some(key);
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, PlaybackError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PlaybackError::Config(format!("{name}: cannot parse '{raw}'"))),
    }
}
