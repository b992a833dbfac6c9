//! Domain layer - Core business logic and entities

pub mod api_key;
pub mod error;
pub mod metering;
pub mod quota;
pub mod rate_limit;
pub mod storage;
pub mod subscription;
pub mod validation;

pub use api_key::{ApiKey, ApiKeyId, ApiKeyRepository, ApiKeyStatus};
pub use error::DomainError;
pub use metering::{FailureMode, UsageEvent, UsageEventSink, Verdict};
pub use quota::{
    ConsumeOutcome, OveragePolicy, PeriodLength, QuotaPolicy, QuotaPolicyError, RequestLimit,
    RolloverOutcome, UsageCounter, UsageCounterStore, UsageSnapshot,
};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStore, TokenBucket};
pub use storage::{Storage, StorageEntity, StorageKey};
pub use subscription::{Subscription, SubscriptionId, SubscriptionRepository, SubscriptionStatus};
pub use validation::{validate_id, IdValidationError};
