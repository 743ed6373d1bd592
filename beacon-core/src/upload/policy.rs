//! Tunables of the upload manager.

use std::time::Duration;

use rand::Rng;

/// Retry delay after recoverable failures.
///
/// The delay after the `n`th consecutive failure is
/// `base * multiplier^(n - 1)`, stretched by a random factor in
/// `[1, 1 + jitter]` and capped at `ceiling`. `jitter` is clamped to
/// `multiplier - 1` so consecutive delays never shrink.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// The delay after the first failure.
    pub base: Duration,
    /// The growth factor per further failure. Values below 1 are treated as 1.
    pub multiplier: f64,
    /// The upper bound of any delay.
    pub ceiling: Duration,
    /// The maximum relative random stretch applied to a delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            ceiling: Duration::from_secs(60 * 60),
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// The delay to wait after `failures` consecutive recoverable failures.
    pub fn delay<R: Rng + ?Sized>(&self, failures: u32, rng: &mut R) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, multiplier - 1.0)
        } else {
            0.0
        };
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nominal = self.base.as_secs_f64() * multiplier.powi(exponent);
        let stretched = nominal * (1.0 + jitter * rng.random::<f64>());
        let capped = stretched.min(self.ceiling.as_secs_f64()).max(0.0);
        Duration::try_from_secs_f64(capped).unwrap_or(self.ceiling)
    }
}

/// The shared cap on upload attempts per time window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Uploads allowed per window.
    pub max_tasks: u32,
    /// Length of the window.
    pub interval: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            max_tasks: 15,
            interval: Duration::from_secs(60),
        }
    }
}

/// The policy applied by the upload manager.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    /// Recoverable failures tolerated per ping before it is discarded.
    pub max_recoverable_failures: u32,
    /// The retry delay curve.
    pub backoff: BackoffPolicy,
    /// The upload rate limit.
    pub rate_limit: RateLimitPolicy,
    /// The maximum number of queued pings; the oldest are evicted beyond it.
    pub max_pending_pings_count: usize,
    /// The maximum total body size of queued pings in bytes.
    pub max_pending_pings_bytes: u64,
    /// Pings with a larger body are discarded on enqueue.
    pub max_ping_body_size: usize,
    /// How long a handed out task may stay in flight before it is retried.
    pub in_flight_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            max_recoverable_failures: 3,
            backoff: BackoffPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            max_pending_pings_count: 250,
            max_pending_pings_bytes: 10 * 1024 * 1024,
            max_ping_body_size: 1024 * 1024,
            in_flight_timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            ceiling: Duration::from_secs(5),
            jitter: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut last = Duration::ZERO;
        for failures in 1..40 {
            let delay = policy.delay(failures, &mut rng);
            assert!(delay >= last, "{:?} < {:?} at {}", delay, last, failures);
            assert!(delay <= policy.ceiling);
            last = delay;
        }
        assert_eq!(last, policy.ceiling);
    }

    #[test]
    fn test_jitter_is_clamped_to_multiplier() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            multiplier: 1.0,
            ceiling: Duration::from_secs(10),
            jitter: 3.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        for failures in 1..5 {
            assert_eq!(policy.delay(failures, &mut rng), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_zero_base() {
        let policy = BackoffPolicy {
            base: Duration::ZERO,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(policy.delay(1, &mut rng), Duration::ZERO);
        assert_eq!(policy.delay(2000, &mut rng), Duration::ZERO);
    }
}
