//! Learner-facing signals broadcast to external collaborators.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pathwise_core::{ConceptId, CourseId, NodeId, UserId};

use crate::assets::AssetKind;

/// Something a UI or analytics consumer may react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// A correct answer scored at or above the celebration threshold.
    Celebration {
        user: UserId,
        course: CourseId,
        node: NodeId,
        score: f64,
    },
    /// A concept crossed the leech threshold.
    LeechDetected {
        user: UserId,
        course: CourseId,
        concept: ConceptId,
        lapse_count: u32,
    },
    CourseCompleted { user: UserId, course: CourseId },
    /// Asset generation gave up; the node is delivered text-only.
    AssetDegraded {
        node: NodeId,
        kind: AssetKind,
        reason: String,
    },
}

/// Fan-out of [`PlaybackEvent`]s. Slow subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }

    /// Sends `event` to current subscribers. Events with no subscriber are
    /// dropped.
    pub fn publish(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback event");
        let _ = self.sender.send(event);
    }
}
