//! In-memory asset cache with per-kind TTLs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::style::{AssetKey, AssetKind};

#[derive(Debug, Clone)]
struct Entry {
    bytes: Arc<Vec<u8>>,
    expires_at: Instant,
}

/// Generated assets keyed by content hash, kind and variant.
///
/// Inserts are idempotent: a live entry is never replaced, so concurrent
/// producers of the same key agree on one value.
#[derive(Debug)]
pub struct AssetCache {
    entries: DashMap<AssetKey, Entry>,
    audio_ttl: Duration,
    image_ttl: Duration,
}

impl AssetCache {
    pub fn new(audio_ttl: Duration, image_ttl: Duration) -> Self {
        AssetCache {
            entries: DashMap::new(),
            audio_ttl,
            image_ttl,
        }
    }

    fn ttl(&self, kind: AssetKind) -> Duration {
        match kind {
            AssetKind::Audio => self.audio_ttl,
            AssetKind::Image => self.image_ttl,
        }
    }

    /// Live bytes for `key`. Expired entries are evicted on the way.
    pub fn get(&self, key: &AssetKey) -> Option<Arc<Vec<u8>>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.bytes));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.get(key).is_some()
    }

    /// Stores `bytes` unless a live entry exists; returns the stored value.
    pub fn insert(&self, key: AssetKey, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let now = Instant::now();
        let expires_at = now + self.ttl(key.kind);
        let mut slot = self.entries.entry(key).or_insert_with(|| Entry {
            bytes: Arc::new(Vec::new()),
            expires_at: now,
        });
        if slot.expires_at <= now {
            *slot = Entry {
                bytes: Arc::new(bytes),
                expires_at,
            };
        }
        Arc::clone(&slot.bytes)
    }

    /// Evicts expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
