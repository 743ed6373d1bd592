use std::time::{Duration, Instant, SystemTime};

use httpdate::parse_http_date;

use super::policy::RateLimitPolicy;

/// The longest the collector may keep us quiet with a single `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// The answer of the rate limiter to "may I upload now?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimiterState {
    /// An upload slot was taken.
    Incrementing,
    /// No upload may happen for the given time.
    Throttled(Duration),
}

/// A fixed window limiter shared by all ping types.
///
/// Besides the local window the limiter honours throttling imposed by the
/// collector through a `Retry-After` value.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    window_start: Option<Instant>,
    count: u32,
    retry_after: Option<SystemTime>,
}

impl RateLimiter {
    /// Create a new RateLimiter.
    pub fn new(policy: RateLimitPolicy) -> Self {
        RateLimiter {
            policy,
            window_start: None,
            count: 0,
            retry_after: None,
        }
    }

    /// Updates the RateLimiter with information from a `Retry-After` header.
    ///
    /// Both the delay-seconds and the HTTP date form are understood; anything
    /// else is ignored. The delay is capped at one day.
    pub fn update_from_retry_after(&mut self, header: &str) {
        let header = header.trim();
        let now = SystemTime::now();
        let delay = if let Ok(value) = header.parse::<f64>() {
            if value.is_finite() && value >= 0.0 {
                Some(Duration::from_secs_f64(
                    value.ceil().min(MAX_RETRY_AFTER.as_secs_f64()),
                ))
            } else {
                None
            }
        } else if let Ok(value) = parse_http_date(header) {
            Some(value.duration_since(now).unwrap_or(Duration::ZERO))
        } else {
            None
        };

        if let Some(until) = delay.and_then(|delay| now.checked_add(delay.min(MAX_RETRY_AFTER))) {
            self.retry_after = Some(until);
        }
    }

    /// The remaining time the collector asked us to stay quiet, if any.
    pub fn is_disabled(&self) -> Option<Duration> {
        let until = self.retry_after?;
        until
            .duration_since(SystemTime::now())
            .ok()
            .filter(|left| !left.is_zero())
    }

    /// Takes an upload slot if one is available at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> RateLimiterState {
        if let Some(time_left) = self.is_disabled() {
            return RateLimiterState::Throttled(time_left);
        }

        let window_expired = self
            .window_start
            .map_or(true, |start| now.saturating_duration_since(start) >= self.policy.interval);
        if window_expired {
            self.window_start = Some(now);
            self.count = 0;
        }

        if self.count >= self.policy.max_tasks {
            let elapsed = self
                .window_start
                .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
            return RateLimiterState::Throttled(self.policy.interval.saturating_sub(elapsed));
        }

        self.count += 1;
        RateLimiterState::Incrementing
    }

    /// Forgets all state, used when the queue is purged.
    pub fn reset(&mut self) {
        self.window_start = None;
        self.count = 0;
        self.retry_after = None;
    }
}
