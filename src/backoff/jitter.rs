//! # Jitter applied to backoff delays.
//!
//! [`JitterPolicy`] randomizes restart delays so that many workflows failing
//! together do not retry in lockstep.
//!
//! ```text
//! None          delay
//! Full          random[0, delay]
//! Equal         delay/2 + random[0, delay/2]
//! Decorrelated  random[floor, min(delay × 3, max)]
//! ```

use std::time::Duration;

use rand::Rng;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// Half the delay plus a random half.
    Equal,
    /// Random delay between the policy floor and three times the base delay.
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter using the thread-local RNG.
    ///
    /// `floor` and `max` are only consulted by [`JitterPolicy::Decorrelated`].
    pub fn apply(&self, delay: Duration, floor: Duration, max: Duration) -> Duration {
        self.apply_with(&mut rand::rng(), delay, floor, max)
    }

    /// Applies jitter using the provided RNG.
    pub fn apply_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        delay: Duration,
        floor: Duration,
        max: Duration,
    ) -> Duration {
        let ms = delay.as_millis() as u64;
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full if ms == 0 => Duration::ZERO,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
            JitterPolicy::Decorrelated => {
                let floor_ms = floor.as_millis() as u64;
                let upper = ms.saturating_mul(3).min(max.as_millis() as u64).max(floor_ms);
                if floor_ms >= upper {
                    return floor;
                }
                Duration::from_millis(rng.random_range(floor_ms..=upper))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: Duration = Duration::from_secs(60);

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d, Duration::ZERO, CAP), d);
    }

    #[test]
    fn test_equal_keeps_at_least_half() {
        let d = Duration::from_millis(1000);
        for _ in 0..100 {
            let j = JitterPolicy::Equal.apply(d, Duration::ZERO, CAP);
            assert!(j >= Duration::from_millis(500) && j <= d);
        }
    }

    #[test]
    fn test_decorrelated_respects_floor_and_cap() {
        let floor = Duration::from_millis(200);
        let max = Duration::from_secs(1);
        for _ in 0..100 {
            let j = JitterPolicy::Decorrelated.apply(Duration::from_millis(800), floor, max);
            assert!(j >= floor && j <= max, "{j:?}");
        }
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        assert_eq!(
            JitterPolicy::Full.apply(Duration::ZERO, Duration::ZERO, CAP),
            Duration::ZERO
        );
    }
}
