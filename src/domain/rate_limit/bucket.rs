//! Token bucket state and arithmetic

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token bucket parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting applies at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Burst size: the most tokens a bucket can hold
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_second: f64,
}

fn default_enabled() -> bool {
    true
}

/// Slowest accepted refill: one token roughly every eleven and a half days
pub const MIN_REFILL_PER_SECOND: f64 = 1e-6;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 60,
            refill_per_second: 1.0,
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            enabled: true,
            capacity,
            refill_per_second,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// A zero capacity or a vanishing refill rate cannot admit anything sensibly
    pub fn is_valid(&self) -> bool {
        self.capacity > 0
            && self.refill_per_second.is_finite()
            && self.refill_per_second >= MIN_REFILL_PER_SECOND
    }
}

/// Outcome of taking a token
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub admitted: bool,
    /// Time until one token is available; set only on deny
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            admitted: true,
            retry_after: None,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            admitted: false,
            retry_after: Some(retry_after),
        }
    }
}

/// Bucket state for one API key
///
/// Time is passed in as seconds on a monotonic clock so the arithmetic is
/// deterministic under test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: f64,
}

impl TokenBucket {
    /// A bucket that starts full
    pub fn full(config: &RateLimitConfig, now: f64) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Refill for the elapsed time, then try to take one token
    pub fn try_take(&mut self, config: &RateLimitConfig, now: f64) -> RateLimitDecision {
        let capacity = f64::from(config.capacity);
        let elapsed = (now - self.last_refill).max(0.0);

        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(capacity);
        self.last_refill = now.max(self.last_refill);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return RateLimitDecision::allow();
        }

        let wait = (1.0 - self.tokens) / config.refill_per_second;
        let retry_after = Duration::try_from_secs_f64(wait.max(0.001)).unwrap_or(Duration::MAX);
        RateLimitDecision::deny(retry_after)
    }
}
