//! SM-2 spaced-repetition scheduling.
//!
//! Recall quality is graded `0..=5`. Grades of 3 and above grow the interval
//! by the easiness factor; lower grades reset it to one day and count a
//! lapse. The easiness factor never drops below [`MIN_EASINESS`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pathwise_core::learner::{ReviewSchedule, MIN_EASINESS};

use crate::error::EngineError;

/// Highest recall grade.
pub const MAX_QUALITY: u8 = 5;
/// Lowest grade that counts as a successful recall.
pub const PASSING_QUALITY: u8 = 3;
/// Upper bound on intervals, roughly a century.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// Tunable review policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    /// A concept with more lapses than this is a leech.
    pub leech_threshold: u32,
    /// Review cards a due concept contributes to the daily queue.
    pub cards_per_concept: usize,
    /// Queue length used when the caller does not ask for one.
    pub default_queue_size: usize,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        ReviewPolicy {
            leech_threshold: 4,
            cards_per_concept: 2,
            default_queue_size: 20,
        }
    }
}

/// Applies one graded review to `schedule`.
pub fn schedule_review(
    schedule: &ReviewSchedule,
    quality: u8,
    now: DateTime<Utc>,
) -> Result<ReviewSchedule, EngineError> {
    if quality > MAX_QUALITY {
        return Err(EngineError::QualityOutOfRange { quality });
    }
    let easiness = schedule.easiness_factor.max(MIN_EASINESS);
    let interval = schedule.interval_days.max(1);

    let mut next = *schedule;
    if quality >= PASSING_QUALITY {
        let grown = (f64::from(interval) * easiness).round();
        next.interval_days = (grown as u32).clamp(1, MAX_INTERVAL_DAYS);
        let q = f64::from(MAX_QUALITY - quality);
        next.easiness_factor = (easiness + (0.1 - q * (0.08 + q * 0.02))).max(MIN_EASINESS);
        next.streak = schedule.streak.saturating_add(1);
    } else {
        next.interval_days = 1;
        next.easiness_factor = (easiness - 0.2).max(MIN_EASINESS);
        next.streak = 0;
        next.lapse_count = schedule.lapse_count.saturating_add(1);
    }
    next.due_at = now + Duration::days(i64::from(next.interval_days));
    next.last_reviewed_at = Some(now);
    Ok(next)
}

/// A concept whose lapses exceed the threshold resists the default strategy.
pub fn is_leech(schedule: &ReviewSchedule, threshold: u32) -> bool {
    schedule.lapse_count > threshold
}

/// Maps an interaction score in `[0, 1]` onto an SM-2 grade.
pub fn quality_from_score(score: f64) -> u8 {
    if score.is_nan() {
        return 0;
    }
    (score.clamp(0.0, 1.0) * f64::from(MAX_QUALITY)).round() as u8
}
