//! Retry with exponential backoff and jitter.

use std::sync::Mutex;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::ConcurrencyPolicy;
use crate::error::PlaybackError;

/// Exponential backoff with seeded jitter.
///
/// The delay before retry `n` (zero-based) is drawn from
/// `[d/2, d]` where `d = min(max, base * 2^n)`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    rng: Mutex<ChaCha8Rng>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, seed: u64) -> Self {
        Backoff {
            base,
            max: max.max(base),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Upper bound of the delay before retry `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay before retry `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = match self.rng.lock() {
            Ok(mut rng) if spread > 0 => rng.gen_range(0..=spread),
            _ => spread,
        };
        half + Duration::from_millis(jitter)
    }
}

/// How compare-and-swap commits are retried.
#[derive(Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &ConcurrencyPolicy, seed: u64) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.retry_base_ms),
                Duration::from_millis(config.retry_max_ms),
                seed,
            ),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-conflict error, or has
/// conflicted `max_retries + 1` times.
///
/// `op` must re-read whatever it writes on every call. Exhaustion surfaces as
/// [`PlaybackError::ConcurrentUpdateConflict`] carrying the attempt count.
pub async fn with_cas_retry<T, F>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, PlaybackError>
where
    F: FnMut() -> Result<T, PlaybackError>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() => {
                if attempt > policy.max_retries {
                    let record = match err {
                        PlaybackError::ConcurrentUpdateConflict { record, .. } => record,
                        _ => label.to_string(),
                    };
                    tracing::warn!(%label, attempts = attempt, "giving up on conflicting write");
                    return Err(PlaybackError::ConcurrentUpdateConflict {
                        record,
                        attempts: attempt,
                    });
                }
                let delay = policy.backoff.delay(attempt - 1);
                tracing::debug!(%label, attempt, ?delay, "write conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 7),
        }
    }

    fn conflict() -> PlaybackError {
        PlaybackError::ConcurrentUpdateConflict {
            record: "mastery".into(),
            attempts: 1,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50), 1);
        assert_eq!(backoff.ceiling(0), Duration::from_millis(10));
        assert_eq!(backoff.ceiling(2), Duration::from_millis(40));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(50));
        assert_eq!(backoff.ceiling(40), Duration::from_millis(50));
        for attempt in 0..6 {
            let d = backoff.delay(attempt);
            assert!(d >= backoff.ceiling(attempt) / 2 && d <= backoff.ceiling(attempt));
        }
    }

    #[test]
    fn same_seed_same_jitter() {
        let a = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 42);
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 42);
        let da: Vec<_> = (0..5).map(|i| a.delay(i)).collect();
        let db: Vec<_> = (0..5).map(|i| b.delay(i)).collect();
        assert_eq!(da, db);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut calls = 0;
        let value = with_cas_retry(&policy(5), "test", || {
            calls += 1;
            if calls < 3 {
                Err(conflict())
            } else {
                Ok(calls)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let err = with_cas_retry(&policy(2), "test", || Err::<(), _>(conflict()))
            .await
            .unwrap_err();
        match err {
            PlaybackError::ConcurrentUpdateConflict { record, attempts } => {
                assert_eq!(record, "mastery");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut calls = 0;
        let err = with_cas_retry(&policy(5), "test", || {
            calls += 1;
            Err::<(), _>(PlaybackError::NotFound("course".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
        assert_eq!(calls, 1);
    }
}
