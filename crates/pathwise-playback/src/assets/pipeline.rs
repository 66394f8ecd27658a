//! Asset generation with bounded parallelism, coalescing and degradation.
//!
//! Each requested asset goes through the same steps:
//!
//! 1. a live cache entry answers immediately
//! 2. a per-key mutex coalesces concurrent producers; latecomers re-check
//!    the cache once they get the lock
//! 3. generation runs under the parallelism semaphore and the generation
//!    timeout, retried with jittered exponential backoff
//! 4. after `max_attempts` failures the node content is marked degraded for
//!    the cool-down and delivered text-only

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use pathwise_core::{Course, Node, NodeId};

use super::cache::AssetCache;
use super::prefetch::CancelToken;
use super::style::{requests_for, AssetKey, AssetKind, AssetRequest};
use crate::concurrency::Backoff;
use crate::config::AssetPolicy;
use crate::events::{EventBus, PlaybackEvent};
use crate::generation::{with_timeout, ContentGenerator, GenerationError};

/// Per-node prefetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Every asset was already cached.
    Cached,
    /// At least one asset was produced by this prefetch.
    Generated,
    /// Generation gave up; delivered text-only until the cool-down ends.
    Degraded,
    Cancelled,
    /// Nothing to produce.
    Skipped,
}

/// How a node can be delivered right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    WithAssets,
    TextOnly,
    /// Assets are expected but not ready yet.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAssetReport {
    pub node: NodeId,
    pub status: AssetStatus,
    /// Failure reason for degraded nodes.
    pub detail: Option<String>,
}

/// Outcome of one prefetch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchReport {
    pub nodes: Vec<NodeAssetReport>,
}

impl PrefetchReport {
    pub fn status_of(&self, node: NodeId) -> Option<AssetStatus> {
        self.nodes.iter().find(|r| r.node == node).map(|r| r.status)
    }

    /// A report marking every node cancelled.
    pub fn cancelled(nodes: &[NodeId]) -> Self {
        PrefetchReport {
            nodes: nodes
                .iter()
                .map(|&node| NodeAssetReport {
                    node,
                    status: AssetStatus::Cancelled,
                    detail: None,
                })
                .collect(),
        }
    }
}

enum Ensured {
    Cached,
    Generated,
    Degraded(String),
    Cancelled,
}

/// Produces and caches narration and illustrations for course nodes.
pub struct AssetPipeline {
    generator: Arc<dyn ContentGenerator>,
    cache: AssetCache,
    inflight: DashMap<AssetKey, Arc<Mutex<()>>>,
    /// Content hash to the end of its degraded cool-down.
    degraded: DashMap<String, Instant>,
    permits: Arc<Semaphore>,
    backoff: Backoff,
    policy: AssetPolicy,
    timeout: Duration,
    events: EventBus,
}

impl AssetPipeline {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        policy: AssetPolicy,
        timeout: Duration,
        events: EventBus,
    ) -> Self {
        AssetPipeline {
            generator,
            cache: AssetCache::new(policy.audio_ttl(), policy.image_ttl()),
            inflight: DashMap::new(),
            degraded: DashMap::new(),
            permits: Arc::new(Semaphore::new(policy.max_parallelism.max(1))),
            backoff: Backoff::new(
                Duration::from_millis(policy.backoff_base_ms),
                Duration::from_millis(policy.backoff_max_ms),
                policy.jitter_seed,
            ),
            policy,
            timeout,
            events,
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Ensures assets for `nodes` exist, concurrently.
    pub async fn prefetch(
        self: &Arc<Self>,
        course: Arc<Course>,
        nodes: Vec<NodeId>,
        cancel: CancelToken,
    ) -> PrefetchReport {
        let mut tasks = JoinSet::new();
        for (index, node) in nodes.iter().copied().enumerate() {
            let pipeline = Arc::clone(self);
            let course = Arc::clone(&course);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let report = pipeline.prefetch_node(&course, node, &cancel).await;
                (index, report)
            });
        }

        let mut reports: Vec<Option<NodeAssetReport>> = vec![None; nodes.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(err) => tracing::error!(error = %err, "prefetch task failed"),
            }
        }
        PrefetchReport {
            nodes: nodes
                .iter()
                .zip(reports)
                .map(|(&node, report)| {
                    report.unwrap_or(NodeAssetReport {
                        node,
                        status: AssetStatus::Degraded,
                        detail: Some("prefetch task failed".into()),
                    })
                })
                .collect(),
        }
    }

    async fn prefetch_node(
        &self,
        course: &Course,
        id: NodeId,
        cancel: &CancelToken,
    ) -> NodeAssetReport {
        let report = |status, detail| NodeAssetReport {
            node: id,
            status,
            detail,
        };
        if cancel.is_cancelled() {
            return report(AssetStatus::Cancelled, None);
        }
        let Some(node) = course.node(id) else {
            return report(AssetStatus::Skipped, None);
        };
        let requests = requests_for(id, node);
        let Some(first) = requests.first() else {
            return report(AssetStatus::Skipped, None);
        };
        if self.is_degraded(&first.key.content_hash) {
            return report(AssetStatus::Degraded, Some("cooling down".into()));
        }

        let mut generated = false;
        for request in &requests {
            match self.ensure(request, cancel).await {
                Ensured::Cached => {}
                Ensured::Generated => generated = true,
                Ensured::Cancelled => return report(AssetStatus::Cancelled, None),
                Ensured::Degraded(reason) => return report(AssetStatus::Degraded, Some(reason)),
            }
        }
        if generated {
            report(AssetStatus::Generated, None)
        } else {
            report(AssetStatus::Cached, None)
        }
    }

    async fn ensure(&self, request: &AssetRequest, cancel: &CancelToken) -> Ensured {
        if self.cache.contains(&request.key) {
            return Ensured::Cached;
        }

        let claim = InflightClaim::new(&self.inflight, &request.key);
        let _guard = tokio::select! {
            guard = claim.slot.lock() => guard,
            _ = cancel.cancelled() => return Ensured::Cancelled,
        };
        if self.cache.contains(&request.key) {
            return Ensured::Cached;
        }
        if self.is_degraded(&request.key.content_hash) {
            return Ensured::Degraded("cooling down".into());
        }

        self.generate_with_retry(request, cancel).await
    }

    async fn generate_with_retry(&self, request: &AssetRequest, cancel: &CancelToken) -> Ensured {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ensured::Cancelled,
                }
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => permit,
                _ = cancel.cancelled() => return Ensured::Cancelled,
            };
            let Ok(_permit) = permit else {
                return Ensured::Degraded("asset pipeline closed".into());
            };

            match with_timeout(self.timeout, self.generate(request)).await {
                Ok(bytes) => {
                    self.cache.insert(request.key.clone(), bytes);
                    tracing::debug!(
                        node = %request.node,
                        kind = %request.key.kind,
                        attempt = attempt + 1,
                        "generated asset"
                    );
                    return Ensured::Generated;
                }
                Err(err) => {
                    tracing::warn!(
                        node = %request.node,
                        kind = %request.key.kind,
                        attempt = attempt + 1,
                        error = %err,
                        "asset generation failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "generation failed".into());
        self.mark_degraded(request, &reason);
        Ensured::Degraded(reason)
    }

    async fn generate(&self, request: &AssetRequest) -> Result<Vec<u8>, GenerationError> {
        match request.key.kind {
            AssetKind::Audio => {
                self.generator
                    .generate_audio(&request.input, &request.key.variant)
                    .await
            }
            AssetKind::Image => {
                self.generator
                    .generate_image(&request.input, &request.key.variant)
                    .await
            }
        }
    }

    fn mark_degraded(&self, request: &AssetRequest, reason: &str) {
        let until = Instant::now() + self.policy.degraded_cooldown();
        self.degraded.insert(request.key.content_hash.clone(), until);
        tracing::warn!(
            node = %request.node,
            kind = %request.key.kind,
            cooldown_secs = self.policy.degraded_cooldown_secs,
            "asset degraded, delivering text-only"
        );
        self.events.publish(PlaybackEvent::AssetDegraded {
            node: request.node,
            kind: request.key.kind,
            reason: reason.to_string(),
        });
    }

    fn is_degraded(&self, content_hash: &str) -> bool {
        let now = Instant::now();
        if let Some(until) = self.degraded.get(content_hash) {
            if *until > now {
                return true;
            }
        }
        self.degraded.remove_if(content_hash, |_, until| *until <= now);
        false
    }

    /// Spawns a background task that evicts expired cache entries and ended
    /// cool-downs every `interval`.
    pub fn start_purge_sweep(self: &Arc<Self>, interval: Duration) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let now = Instant::now();
                pipeline.degraded.retain(|_, until| *until > now);
                let purged = pipeline.cache.purge_expired();
                if purged > 0 {
                    tracing::info!("purged {} expired asset(s)", purged);
                }
            }
        });
    }

    /// Whether `node` can be shown with its assets now.
    pub fn delivery_mode(&self, id: NodeId, node: &Node) -> DeliveryMode {
        let requests = requests_for(id, node);
        let Some(first) = requests.first() else {
            return DeliveryMode::TextOnly;
        };
        if self.is_degraded(&first.key.content_hash) {
            return DeliveryMode::TextOnly;
        }
        if requests.iter().all(|r| self.cache.contains(&r.key)) {
            DeliveryMode::WithAssets
        } else {
            DeliveryMode::Pending
        }
    }

    /// Cached assets of `node`, by kind.
    pub fn assets_for(&self, id: NodeId, node: &Node) -> Vec<(AssetKind, Arc<Vec<u8>>)> {
        requests_for(id, node)
            .into_iter()
            .filter_map(|r| self.cache.get(&r.key).map(|bytes| (r.key.kind, bytes)))
            .collect()
    }
}

/// A hold on the per-key generation slot. The last holder to let go removes
/// the map entry.
struct InflightClaim<'a> {
    map: &'a DashMap<AssetKey, Arc<Mutex<()>>>,
    key: AssetKey,
    slot: Arc<Mutex<()>>,
}

impl<'a> InflightClaim<'a> {
    fn new(map: &'a DashMap<AssetKey, Arc<Mutex<()>>>, key: &AssetKey) -> Self {
        let slot = Arc::clone(map.entry(key.clone()).or_default().value());
        InflightClaim {
            map,
            key: key.clone(),
            slot,
        }
    }
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        // Two holders left: the map and this claim.
        self.map.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        });
    }
}
