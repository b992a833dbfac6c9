//! Subscription service
//!
//! Subscription lifecycle and read-only usage views. Subscribing opens the
//! first usage period so the very first request is already metered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::quota::{QuotaPolicy, UsageCounterStore, UsageSnapshot};
use crate::domain::subscription::{
    Subscription, SubscriptionId, SubscriptionRepository, SubscriptionStatus,
};
use crate::domain::DomainError;

/// Parameters for a new subscription
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub buyer_id: String,
    pub listing_id: String,
    /// Falls back to the service default when absent
    pub policy: Option<QuotaPolicy>,
    /// Anchor of the first period; defaults to now
    pub period_start: Option<DateTime<Utc>>,
}

impl SubscribeRequest {
    pub fn new(buyer_id: impl Into<String>, listing_id: impl Into<String>) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            listing_id: listing_id.into(),
            policy: None,
            period_start: None,
        }
    }

    pub fn with_policy(mut self, policy: QuotaPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    counters: Arc<dyn UsageCounterStore>,
    default_policy: QuotaPolicy,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        counters: Arc<dyn UsageCounterStore>,
    ) -> Self {
        Self {
            subscriptions,
            counters,
            default_policy: QuotaPolicy::default(),
        }
    }

    pub fn with_default_policy(mut self, policy: QuotaPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Create a subscription and open its first usage period
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, DomainError> {
        if request.buyer_id.trim().is_empty() || request.listing_id.trim().is_empty() {
            return Err(DomainError::validation(
                "Buyer and listing identifiers are required",
            ));
        }

        let policy = request.policy.unwrap_or(self.default_policy);
        let period_start = request.period_start.unwrap_or_else(Utc::now);
        let subscription = Subscription::new(
            SubscriptionId::generate(),
            request.buyer_id,
            request.listing_id,
            policy,
            period_start,
        );

        let created = self.subscriptions.create(subscription).await?;
        self.counters
            .open_period(
                created.id(),
                period_start,
                created.current_period_end(),
                &policy,
            )
            .await?;

        info!(
            subscription_id = %created.id(),
            listing_id = %created.listing_id(),
            period = %policy.period(),
            limit = ?policy.request_limit().value(),
            "Subscription created"
        );

        Ok(created)
    }

    pub async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        self.subscriptions.get(id).await
    }

    pub async fn list(
        &self,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.subscriptions.list(status).await
    }

    pub async fn suspend(&self, id: &SubscriptionId) -> Result<Subscription, DomainError> {
        self.transition(id, SubscriptionStatus::Suspended).await
    }

    pub async fn resume(&self, id: &SubscriptionId) -> Result<Subscription, DomainError> {
        self.transition(id, SubscriptionStatus::Active).await
    }

    /// Terminal: a cancelled subscription is never reactivated or rolled over
    pub async fn cancel(&self, id: &SubscriptionId) -> Result<Subscription, DomainError> {
        self.transition(id, SubscriptionStatus::Cancelled).await
    }

    /// Queue a new policy; it takes effect at the next period boundary
    pub async fn schedule_policy(
        &self,
        id: &SubscriptionId,
        policy: QuotaPolicy,
    ) -> Result<Subscription, DomainError> {
        let updated = self
            .subscriptions
            .update_with(
                id,
                Box::new(move |subscription: &mut Subscription| {
                    if subscription.status() == SubscriptionStatus::Cancelled {
                        return Err(DomainError::invalid_transition(format!(
                            "Subscription '{}' is cancelled",
                            subscription.id()
                        )));
                    }

                    subscription.schedule_policy(policy);
                    Ok(())
                }),
            )
            .await?;

        info!(subscription_id = %id, "Quota policy change scheduled for next period");
        Ok(updated)
    }

    /// Consumption in the open period
    pub async fn usage(&self, id: &SubscriptionId) -> Result<UsageSnapshot, DomainError> {
        self.require(id).await?;

        self.counters
            .current(id)
            .await?
            .map(|counter| counter.snapshot())
            .ok_or_else(|| {
                DomainError::not_found(format!("No open usage period for subscription '{}'", id))
            })
    }

    /// Closed periods, oldest first
    pub async fn usage_history(
        &self,
        id: &SubscriptionId,
    ) -> Result<Vec<UsageSnapshot>, DomainError> {
        self.require(id).await?;

        Ok(self
            .counters
            .archived(id)
            .await?
            .iter()
            .map(|counter| counter.snapshot())
            .collect())
    }

    async fn transition(
        &self,
        id: &SubscriptionId,
        next: SubscriptionStatus,
    ) -> Result<Subscription, DomainError> {
        let updated = self
            .subscriptions
            .update_with(
                id,
                Box::new(move |subscription: &mut Subscription| {
                    subscription.transition_to(next).map_err(|current| {
                        DomainError::invalid_transition(format!(
                            "Subscription '{}' cannot move from {} to {}",
                            subscription.id(),
                            current,
                            next
                        ))
                    })
                }),
            )
            .await?;
        info!(subscription_id = %id, status = %next, "Subscription status changed");

        Ok(updated)
    }

    async fn require(&self, id: &SubscriptionId) -> Result<Subscription, DomainError> {
        self.subscriptions
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Subscription '{}' not found", id)))
    }
}
