//! In-memory token bucket store using moka

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;

use crate::domain::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStore, TokenBucket};
use crate::domain::DomainError;

/// Configuration for the in-memory bucket store
#[derive(Debug, Clone)]
pub struct InMemoryRateLimitStoreConfig {
    /// Maximum number of tracked keys
    pub max_capacity: u64,
    /// Buckets untouched for this long are evicted; they would be full again anyway
    pub time_to_idle: Duration,
}

impl Default for InMemoryRateLimitStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            time_to_idle: Duration::from_secs(600),
        }
    }
}

impl InMemoryRateLimitStoreConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = tti;
        self
    }
}

/// Token buckets held in an idle-evicting cache
///
/// Each bucket sits behind its own mutex, so updates for one key are
/// serialized while different keys never contend.
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    buckets: MokaCache<String, Arc<Mutex<TokenBucket>>>,
    epoch: Instant,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_config(InMemoryRateLimitStoreConfig::default())
    }

    pub fn with_config(config: InMemoryRateLimitStoreConfig) -> Self {
        let buckets = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(config.time_to_idle)
            .build();

        Self {
            buckets,
            epoch: Instant::now(),
        }
    }

    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Number of tracked buckets (approximate until pending evictions run)
    pub fn tracked_keys(&self) -> u64 {
        self.buckets.entry_count()
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn take(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, DomainError> {
        let now = self.now_secs();
        let bucket = self
            .buckets
            .get_with(key.to_string(), async {
                Arc::new(Mutex::new(TokenBucket::full(config, now)))
            })
            .await;

        // Bucket state is valid even if a previous holder panicked
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);

        // Read the clock under the lock so refills stay monotonic per key
        Ok(bucket.try_take(config, self.now_secs()))
    }

    async fn reset(&self, key: &str) -> Result<(), DomainError> {
        self.buckets.invalidate(key).await;
        Ok(())
    }
}
