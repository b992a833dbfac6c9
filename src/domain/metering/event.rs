//! Usage events emitted for admitted requests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::api_key::ApiKeyId;
use crate::domain::subscription::SubscriptionId;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// One admitted request, as seen by downstream billing
///
/// Delivery is at-least-once; consumers deduplicate on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub api_key_id: ApiKeyId,
    pub subscription_id: SubscriptionId,
    /// Period the request was counted in; `None` when counting was skipped
    pub period_start: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
    pub under_counted: bool,
    pub over_quota: bool,
}

impl UsageEvent {
    pub fn new(
        api_key_id: ApiKeyId,
        subscription_id: SubscriptionId,
        period_start: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key_id,
            subscription_id,
            period_start,
            occurred_at: Utc::now(),
            under_counted: false,
            over_quota: false,
        }
    }

    pub fn with_under_counted(mut self, under_counted: bool) -> Self {
        self.under_counted = under_counted;
        self
    }

    pub fn with_over_quota(mut self, over_quota: bool) -> Self {
        self.over_quota = over_quota;
        self
    }
}

/// Destination for usage events
///
/// A failed `publish` leaves the whole batch pending; it will be offered
/// again, so implementations must tolerate duplicates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UsageEventSink: Send + Sync {
    /// Short name for logs and metrics
    fn name(&self) -> &'static str;

    async fn publish(&self, events: &[UsageEvent]) -> Result<(), DomainError>;
}
