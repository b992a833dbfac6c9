//! Usage counter store trait

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::counter::{ConsumeOutcome, RolloverOutcome, UsageCounter};
use super::policy::QuotaPolicy;
use crate::domain::subscription::SubscriptionId;
use crate::domain::DomainError;

/// Persistence boundary for usage counters
///
/// Implementations keep exactly one active counter per subscription and an
/// archive of retired ones keyed by `(subscription_id, period_start)`.
/// `try_consume` and `open_period` must be linearizable per subscription:
/// every admitted increment lands in exactly one period.
#[async_trait]
pub trait UsageCounterStore: Send + Sync + Debug {
    /// Atomically add `n` to the active counter if the policy allows it
    ///
    /// Fails with `NotFound` when no period is open for the subscription or
    /// the open one has already ended, and with `Unavailable` when the
    /// backing store cannot be reached.
    async fn try_consume(
        &self,
        subscription_id: &SubscriptionId,
        n: u64,
    ) -> Result<ConsumeOutcome, DomainError>;

    /// The active counter, if a period is open
    async fn current(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsageCounter>, DomainError>;

    /// Active or archived counter for a specific period
    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageCounter>, DomainError>;

    /// Archived counters, oldest first
    async fn archived(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<UsageCounter>, DomainError>;

    /// Archive the active counter and open a fresh one for
    /// `[period_start, period_end)`
    ///
    /// `period_start` is the idempotency key: if the active counter already
    /// starts at or after it, nothing changes and `AlreadyCurrent` is returned.
    async fn open_period(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> Result<RolloverOutcome, DomainError>;
}
