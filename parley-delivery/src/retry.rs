//! Retry policy: how many attempts an entry gets, and how long it waits
//! between them.

use std::time::Duration;

use parley_queue::RetrySchedule;
use rand::Rng;
use serde::Deserialize;

/// Exponential backoff with jitter, bounded by an attempt budget.
///
/// The wait before attempt `n + 1` is `min(base * 2^(n - 1), max)`, spread
/// by `± jitter`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before an entry is moved to `Error`.
    ///
    /// Default: 25 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Default: 60 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Caps the exponential backoff.
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Default: 0.2 (±20%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Largest accepted `max_retry_delay_secs`: one year.
    pub const MAX_RETRY_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

    /// `true` while `attempts` leaves room for another one.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// `true` once `attempts` has used up the budget. The attempt that
    /// reaches `max_attempts` is the last.
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        !self.should_retry(attempts)
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }

    /// Backoff before the next attempt, without jitter.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_retry_delay_secs
        } else {
            self.base_retry_delay_secs
                .saturating_mul(1u64 << exponent)
                .min(self.max_retry_delay_secs)
        };
        Duration::from_secs(delay)
    }

    /// Backoff with jitter applied.
    ///
    /// A jitter factor that is not a number in `0.0..=1.0` applies no
    /// jitter; one that leaves no representable delay falls back to the
    /// cap.
    #[must_use]
    pub fn calculate_next_retry(&self, attempts: u32) -> Duration {
        let delay = self.backoff(attempts);
        let factor = self.retry_jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return delay;
        }

        let seconds = delay.as_secs_f64();
        let range = seconds * factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::try_from_secs_f64((seconds + jitter).max(0.0))
            .unwrap_or_else(|_| Duration::from_secs(self.max_retry_delay_secs))
    }
}

impl RetrySchedule for RetryPolicy {
    fn is_exhausted(&self, attempts: u32) -> bool {
        Self::is_exhausted(self, attempts)
    }

    fn next_attempt_at_ms(&self, attempts: u32, now_ms: u64) -> u64 {
        let delay = u64::try_from(self.calculate_next_retry(attempts).as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_add(delay)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        25
    }

    pub const fn base_retry_delay_secs() -> u64 {
        60
    }

    pub const fn max_retry_delay_secs() -> u64 {
        86400
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_retry_delay_secs: 60,
            max_retry_delay_secs: 86400,
            retry_jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 25);
        assert_eq!(policy.base_retry_delay_secs, 60);
        assert_eq!(policy.max_retry_delay_secs, 86400);
        assert!((policy.retry_jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exhausted_on_the_last_attempt() {
        let policy = fixed(3);
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
        assert_eq!(policy.remaining_attempts(2), 1);
        assert_eq!(policy.remaining_attempts(9), 0);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = fixed(25);
        assert_eq!(policy.calculate_next_retry(1), Duration::from_secs(60));
        assert_eq!(policy.calculate_next_retry(2), Duration::from_secs(120));
        assert_eq!(policy.calculate_next_retry(3), Duration::from_secs(240));
        assert_eq!(policy.calculate_next_retry(20), Duration::from_secs(86400));
        assert_eq!(policy.calculate_next_retry(200), Duration::from_secs(86400));
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let policy = RetryPolicy {
            retry_jitter_factor: 0.2,
            ..fixed(25)
        };

        for _ in 0..50 {
            let delay = policy.calculate_next_retry(2).as_secs_f64();
            assert!((96.0..=144.0).contains(&delay), "{delay} outside jitter range");
        }
    }

    #[test]
    fn test_unusable_jitter_never_panics() {
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -1.0] {
            let policy = RetryPolicy {
                retry_jitter_factor: jitter,
                ..fixed(25)
            };
            assert_eq!(policy.calculate_next_retry(2), Duration::from_secs(120));
        }

        let policy = RetryPolicy {
            base_retry_delay_secs: u64::MAX,
            max_retry_delay_secs: u64::MAX,
            retry_jitter_factor: 1.0,
            ..fixed(25)
        };
        for _ in 0..20 {
            assert!(RetrySchedule::next_attempt_at_ms(&policy, 3, 1_000) >= 1_000);
        }
    }

    #[test]
    fn test_schedule_is_relative_to_now() {
        let policy = fixed(5);
        assert_eq!(
            RetrySchedule::next_attempt_at_ms(&policy, 1, 1_000),
            61_000
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy = ron::from_str("(max_attempts: 4)").unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_retry_delay_secs, 60);
    }
}
