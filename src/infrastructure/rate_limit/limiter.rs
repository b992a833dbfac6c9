//! Rate limiter service
//!
//! Resolves the effective bucket parameters for a key and delegates the
//! token arithmetic to a [`RateLimitStore`].

use std::sync::Arc;

use tracing::debug;

use crate::domain::api_key::ApiKey;
use crate::domain::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStore};
use crate::domain::DomainError;

/// Per-key token bucket limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    defaults: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, defaults: RateLimitConfig) -> Self {
        Self { store, defaults }
    }

    pub fn defaults(&self) -> &RateLimitConfig {
        &self.defaults
    }

    /// Bucket parameters for `key`: its own override, else the defaults
    pub fn effective_config(&self, key: &ApiKey) -> RateLimitConfig {
        key.rate_limits().copied().unwrap_or(self.defaults)
    }

    /// Take one token for `key`
    pub async fn check(&self, key: &ApiKey) -> Result<RateLimitDecision, DomainError> {
        let config = self.effective_config(key);

        if !config.enabled {
            return Ok(RateLimitDecision::allow());
        }

        if !config.is_valid() {
            return Err(DomainError::configuration(format!(
                "Invalid rate limit for API key '{}': capacity={}, refill_per_second={}",
                key.id(),
                config.capacity,
                config.refill_per_second
            )));
        }

        let decision = self.store.take(key.id().as_str(), &config).await?;

        if !decision.admitted {
            debug!(
                api_key_id = %key.id(),
                retry_after_ms = decision.retry_after.map(|d| d.as_millis() as u64),
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Forget the bucket for a key
    pub async fn reset(&self, key: &ApiKey) -> Result<(), DomainError> {
        self.store.reset(key.id().as_str()).await
    }
}
