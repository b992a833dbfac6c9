//! Rate limit bucket store trait

use std::fmt::Debug;

use async_trait::async_trait;

use super::bucket::{RateLimitConfig, RateLimitDecision};
use crate::domain::DomainError;

/// Holds token buckets keyed by API key id
///
/// Bucket state is ephemeral; losing it only resets burst protection.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Refill and take one token from the bucket for `key`
    async fn take(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, DomainError>;

    /// Drop the bucket for `key`, so the next request starts full
    async fn reset(&self, key: &str) -> Result<(), DomainError>;
}
