//! Exponential backoff retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy wrapping executor invocations.
///
/// After the `n`-th failed attempt (1-based) the caller sleeps
/// `min(max_delay, initial_delay × multiplier^(n-1))`, scaled by a random
/// factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed (1 = no retries).
    pub max_attempts: u32,
    /// Backoff after the first failure.
    #[serde(with = "crate::serde_duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any single backoff.
    #[serde(with = "crate::serde_duration_ms")]
    pub max_delay: Duration,
    /// Exponential growth factor per attempt.
    pub multiplier: f64,
    /// Relative jitter applied to each delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Returns `true` if no further attempt is allowed after
    /// `failed_attempts` failures.
    #[must_use]
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    /// Deterministic backoff after the `n`-th failed attempt (1-based),
    /// before jitter.
    #[must_use]
    pub fn base_delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = self.multiplier.powi(exponent as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Backoff after the `n`-th failed attempt (1-based), with jitter.
    #[must_use]
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay_for(failed_attempts);
        if self.jitter <= 0.0 {
            return base;
        }
        // Random factor in [1 - jitter, 1 + jitter].
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + spread * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_millis((base.as_millis() as f64 * factor).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy(initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter: 0.0,
        }
    }

    #[rstest]
    #[case(1, 10)]
    #[case(2, 20)]
    #[case(3, 40)]
    #[case(4, 80)]
    fn exponential_growth(#[case] failed_attempts: u32, #[case] expected_ms: u64) {
        let p = policy(10, 2.0, 10_000);
        assert_eq!(
            p.base_delay_for(failed_attempts),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn delay_is_capped_at_max() {
        let p = policy(100, 10.0, 500);
        assert_eq!(p.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(p.base_delay_for(2), Duration::from_millis(500));
        assert_eq!(p.base_delay_for(6), Duration::from_millis(500));
    }

    #[test]
    fn exhaustion_counts_attempts() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!p.is_exhausted(1));
        assert!(!p.is_exhausted(2));
        assert!(p.is_exhausted(3));
        assert!(p.is_exhausted(4));
    }

    #[test]
    fn no_retries_policy_exhausts_after_one_attempt() {
        let p = RetryPolicy::no_retries();
        assert!(p.is_exhausted(1));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = policy(10, 2.0, 10_000);
        assert_eq!(p.delay_for(2), p.base_delay_for(2));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.5,
        };
        for _ in 0..100 {
            let d = p.delay_for(1).as_millis() as f64;
            assert!((500.0..=1500.0).contains(&d), "jittered delay {d} out of range");
        }
    }

    #[test]
    fn serde_roundtrip() {
        let p = RetryPolicy::default();
        let json = serde_json::to_string(&p).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
