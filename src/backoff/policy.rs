//! # Backoff policy for workflow restarts.
//!
//! [`BackoffPolicy`] decides how long to wait before attempt `n` and when to
//! give up:
//! - delay for attempt `n` is `first × factor^n`, clamped to `max`, then jittered;
//! - `max_attempts` bounds the number of attempts (`0` = unlimited);
//! - `max_elapsed` bounds the total retry time (`Duration::ZERO` = unlimited).
//!
//! The base delay is derived from the attempt number only, so jitter output
//! never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use flowvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//!     max_attempts: 5,
//!     max_elapsed: Duration::ZERO,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! assert_eq!(backoff.attempt_limit(), Some(5));
//! assert_eq!(backoff.elapsed_limit(), None);
//! ```

use std::time::Duration;

use super::jitter::JitterPolicy;

/// Retry backoff policy with an optional attempt/elapsed budget.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first attempt.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy.
    pub jitter: JitterPolicy,
    /// Maximum attempts before exhaustion (`0` = unlimited).
    pub max_attempts: u32,
    /// Maximum total retry time before exhaustion (`ZERO` = unlimited).
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    /// Constant 2s delay, capped at 60s, no jitter, unlimited budget.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(2),
            max: Duration::from_secs(60),
            factor: 1.0,
            jitter: JitterPolicy::None,
            max_attempts: 0,
            max_elapsed: Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay with a bounded number of attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            first: delay,
            max: delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Computes the delay before the given attempt (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base, self.first.min(self.max), self.max)
    }

    /// Returns `Some(limit)` when attempts are bounded.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    /// Returns `Some(limit)` when total retry time is bounded.
    pub fn elapsed_limit(&self) -> Option<Duration> {
        (!self.max_elapsed.is_zero()).then_some(self.max_elapsed)
    }

    /// Returns `true` once `attempts` reached the attempt budget.
    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.attempt_limit().is_some_and(|limit| attempts >= limit)
    }

    /// Returns `true` when waiting `next_delay` more would exceed the elapsed budget.
    pub fn elapsed_exhausted(&self, elapsed: Duration, next_delay: Duration) -> bool {
        self.elapsed_limit()
            .is_some_and(|limit| elapsed.saturating_add(next_delay) > limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = exponential();
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            ..exponential()
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        assert_eq!(exponential().next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_full_jitter_never_exceeds_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..exponential()
        };
        for attempt in 0..12 {
            let base = (100.0 * 2f64.powi(attempt as i32)).min(30_000.0) as u64;
            assert!(policy.next(attempt) <= Duration::from_millis(base));
        }
    }

    #[test]
    fn test_zero_means_unlimited_budget() {
        let policy = BackoffPolicy::default();
        assert!(!policy.attempts_exhausted(u32::MAX));
        assert!(!policy.elapsed_exhausted(Duration::from_secs(86_400), Duration::from_secs(60)));
    }

    #[test]
    fn test_budget_limits() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(10),
            ..BackoffPolicy::fixed(Duration::from_secs(2), 3)
        };
        assert!(!policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
        assert!(!policy.elapsed_exhausted(Duration::from_secs(8), Duration::from_secs(2)));
        assert!(policy.elapsed_exhausted(Duration::from_secs(9), Duration::from_secs(2)));
    }
}
