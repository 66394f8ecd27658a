//! Background prefetch worker pool.
//!
//! Lookahead results are queued as jobs and picked up by a fixed number of
//! workers sharing one receiver. Each (user, course) has at most one live
//! lookahead generation: submitting a new one cancels the previous job,
//! whether it is still queued or already running. A generation is forgotten
//! once its job finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};

use pathwise_core::{Course, NodeId};
use pathwise_storage::ProgressKey;

use super::pipeline::{AssetPipeline, PrefetchReport};

/// Cancels the jobs holding the paired [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation of one prefetch generation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> CancelToken {
        CancelToken::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct PrefetchJob {
    key: ProgressKey,
    generation: u64,
    course: Arc<Course>,
    nodes: Vec<NodeId>,
    cancel: CancelToken,
    reply: oneshot::Sender<PrefetchReport>,
}

/// A queued prefetch.
#[derive(Debug)]
pub struct PrefetchTicket {
    pub generation: u64,
    pub cancel: CancelToken,
    /// Resolves with the report; closed if the job was dropped.
    pub report: oneshot::Receiver<PrefetchReport>,
}

/// Queue plus workers feeding an [`AssetPipeline`].
pub struct PrefetchQueue {
    sender: mpsc::Sender<PrefetchJob>,
    live: LiveGenerations,
    next_generation: AtomicU64,
}

type LiveGenerations = Arc<DashMap<ProgressKey, (u64, CancelHandle)>>;

/// Forgets `generation` of `key` unless a newer one replaced it.
fn retire(live: &LiveGenerations, key: &ProgressKey, generation: u64) {
    live.remove_if(key, |_, (current, _)| *current == generation);
}

impl PrefetchQueue {
    /// Spawns `workers` tasks; must be called inside a tokio runtime.
    pub fn start(pipeline: Arc<AssetPipeline>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<PrefetchJob>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let live: LiveGenerations = Arc::new(DashMap::new());
        let workers = workers.max(1);
        for worker in 0..workers {
            let receiver = Arc::clone(&receiver);
            let pipeline = Arc::clone(&pipeline);
            let live = Arc::clone(&live);
            tokio::spawn(async move {
                worker_task(worker, receiver, pipeline, live).await;
            });
        }
        tracing::info!(workers, capacity, "prefetch pool started");
        PrefetchQueue {
            sender,
            live,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Queues a prefetch of `nodes` for `key`, cancelling the previous
    /// generation. Returns `None` when the queue is full or closed.
    pub fn submit(
        &self,
        key: ProgressKey,
        course: Arc<Course>,
        nodes: Vec<NodeId>,
    ) -> Option<PrefetchTicket> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (handle, cancel) = CancelToken::pair();
        if let Some((previous, old)) = self.live.insert(key, (generation, handle)) {
            old.cancel();
            tracing::debug!(%key, previous, generation, "superseded prefetch generation");
        }

        let (reply, report) = oneshot::channel();
        let job = PrefetchJob {
            key,
            generation,
            course,
            nodes,
            cancel: cancel.clone(),
            reply,
        };
        match self.sender.try_send(job) {
            Ok(()) => Some(PrefetchTicket {
                generation,
                cancel,
                report,
            }),
            Err(err) => {
                tracing::warn!(%key, generation, error = %err, "prefetch job dropped");
                retire(&self.live, &key, generation);
                None
            }
        }
    }

    /// Cancels the live generation of `key`, if any.
    pub fn cancel(&self, key: &ProgressKey) {
        if let Some((_, (_, handle))) = self.live.remove(key) {
            handle.cancel();
        }
    }

    pub fn current_generation(&self, key: &ProgressKey) -> Option<u64> {
        self.live.get(key).map(|entry| entry.0)
    }
}

async fn worker_task(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PrefetchJob>>>,
    pipeline: Arc<AssetPipeline>,
    live: LiveGenerations,
) {
    loop {
        let job = {
            let mut rx = receiver.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => {
                    tracing::debug!(worker, "prefetch worker shutting down");
                    return;
                }
            }
        };

        let report = if job.cancel.is_cancelled() {
            PrefetchReport::cancelled(&job.nodes)
        } else {
            tracing::debug!(
                worker,
                key = %job.key,
                generation = job.generation,
                nodes = job.nodes.len(),
                "prefetching"
            );
            pipeline
                .prefetch(job.course, job.nodes, job.cancel)
                .await
        };
        retire(&live, &job.key, job.generation);
        let _ = job.reply.send(report);
    }
}
