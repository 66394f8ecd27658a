//! Concurrency building blocks for per-learner writes:
//! - [`key_lock::KeyLockManager`] serializes writers of the same records
//! - [`retry`] retries compare-and-swap commits with jittered backoff

pub mod key_lock;
pub mod retry;

pub use key_lock::{KeyGuard, KeyLockManager, LockKey};
pub use retry::{with_cas_retry, Backoff, RetryPolicy};
