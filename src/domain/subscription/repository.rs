//! Subscription repository trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use super::entity::{Subscription, SubscriptionId, SubscriptionStatus};
use crate::domain::quota::QuotaPolicy;
use crate::domain::DomainError;

/// Change applied to the freshly stored record while writes are serialized
pub type SubscriptionChange =
    Box<dyn FnOnce(&mut Subscription) -> Result<(), DomainError> + Send>;

/// Repository trait for subscription storage
#[async_trait]
pub trait SubscriptionRepository: Send + Sync + Debug {
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    async fn create(&self, subscription: Subscription) -> Result<Subscription, DomainError>;

    /// Read, change and store one subscription as a single step
    ///
    /// Writes through this method never overwrite each other. An `Err` from
    /// `change` leaves the stored record untouched.
    async fn update_with(
        &self,
        id: &SubscriptionId,
        change: SubscriptionChange,
    ) -> Result<Subscription, DomainError>;

    /// Record that the period starting at `period_start` opened with `policy`
    ///
    /// Earlier or equal starts leave the record unchanged.
    async fn advance_period(
        &self,
        id: &SubscriptionId,
        period_start: DateTime<Utc>,
        policy: QuotaPolicy,
    ) -> Result<Subscription, DomainError> {
        self.update_with(
            id,
            Box::new(move |subscription: &mut Subscription| {
                subscription.advance_period(period_start, policy);
                Ok(())
            }),
        )
        .await
    }

    /// List subscriptions, optionally filtered by status
    async fn list(
        &self,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Subscriptions the period scheduler must keep rolling (not cancelled)
    async fn list_rollable(&self) -> Result<Vec<Subscription>, DomainError> {
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .filter(|s| s.status() != SubscriptionStatus::Cancelled)
            .collect())
    }
}
