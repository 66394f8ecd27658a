//! Per-learner-record async locks.
//!
//! [`KeyLockManager`] hands out exclusive guards over sets of record keys.
//! Keys are sorted and deduplicated before acquisition, so two writers that
//! need overlapping key sets always lock them in the same order and cannot
//! deadlock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use pathwise_storage::{ConceptKey, ProgressKey};

/// A lockable learner record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Progress(ProgressKey),
    Concept(ConceptKey),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Progress(key) => write!(f, "progress {}", key),
            LockKey::Concept(key) => write!(f, "concept {}", key),
        }
    }
}

/// Holds every lock of one acquisition until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    /// Keys held, in acquisition order.
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

/// In-process lock table keyed by learner record.
#[derive(Debug, Default)]
pub struct KeyLockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl KeyLockManager {
    pub fn new() -> Self {
        KeyLockManager::default()
    }

    fn slot(&self, key: LockKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    /// Locks every key in `keys`, waiting for current holders.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> KeyGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = self.slot(*key);
            let guard = match Arc::clone(&slot).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(%key, "waiting on contended learner record");
                    slot.lock_owned().await
                }
            };
            guards.push(guard);
        }
        KeyGuard {
            keys,
            _guards: guards,
        }
    }

    /// Number of keys with a lock slot.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drops slots nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Spawns a background task that prunes idle slots every `interval`.
    pub fn start_prune_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let pruned = manager.prune();
                if pruned > 0 {
                    tracing::info!("pruned {} idle record lock(s)", pruned);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwise_core::{ConceptId, CourseId, UserId};

    fn concept_key(user: UserId, concept: u32) -> LockKey {
        LockKey::Concept(ConceptKey {
            user,
            course: CourseId(1),
            concept: ConceptId(concept),
        })
    }

    #[tokio::test]
    async fn keys_are_sorted_and_deduplicated() {
        let manager = KeyLockManager::new();
        let user = UserId::new_v4();
        let guard = manager
            .acquire([concept_key(user, 2), concept_key(user, 1), concept_key(user, 2)])
            .await;
        assert_eq!(guard.keys(), &[concept_key(user, 1), concept_key(user, 2)]);
    }

    #[tokio::test]
    async fn second_holder_waits_for_the_first() {
        let manager = Arc::new(KeyLockManager::new());
        let key = concept_key(UserId::new_v4(), 0);
        let guard = manager.acquire([key]).await;

        let contender = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let _guard = manager.acquire([key]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn prune_keeps_held_slots() {
        let manager = KeyLockManager::new();
        let user = UserId::new_v4();
        let held = manager.acquire([concept_key(user, 0)]).await;
        drop(manager.acquire([concept_key(user, 1)]).await);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.prune(), 1);
        assert_eq!(manager.len(), 1);
        drop(held);
        assert_eq!(manager.prune(), 1);
        assert!(manager.is_empty());
    }
}
