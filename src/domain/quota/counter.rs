//! Usage counter entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::QuotaPolicy;
use crate::domain::subscription::SubscriptionId;

/// Requests consumed by one subscription within one billing period
///
/// The counter carries the policy that was active when its period opened; a
/// policy change never alters a counter that is already open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageCounter {
    subscription_id: SubscriptionId,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    consumed_count: u64,
    policy: QuotaPolicy,
    last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_at: Option<DateTime<Utc>>,
}

/// Result of a conditional increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub admitted: bool,
    /// Count after the operation (unchanged on deny)
    pub consumed: u64,
    /// Requests left, `None` when unlimited
    pub remaining: Option<u64>,
    /// Admitted past the limit under a soft-allow policy
    pub over_quota: bool,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Result of opening a period
#[derive(Debug, Clone, PartialEq)]
pub enum RolloverOutcome {
    /// A fresh counter was opened; the previous one (if any) was archived
    Opened {
        counter: UsageCounter,
        archived: Option<UsageCounter>,
    },
    /// The active counter already starts at or after the requested period
    AlreadyCurrent { period_start: DateTime<Utc> },
}

impl RolloverOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, Self::Opened { .. })
    }
}

/// Read-only usage view for dashboards and admin endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub subscription_id: SubscriptionId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub consumed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_used: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl UsageCounter {
    /// Open a counter at zero for the period `[period_start, period_end)`
    pub fn open(
        subscription_id: SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            subscription_id,
            period_start,
            period_end,
            consumed_count: 0,
            policy,
            last_updated: Utc::now(),
            archived_at: None,
        }
    }

    /// Rebuild a counter from persisted columns
    pub fn restore(
        subscription_id: SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        consumed_count: u64,
        policy: QuotaPolicy,
        last_updated: DateTime<Utc>,
        archived_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subscription_id,
            period_start,
            period_end,
            consumed_count,
            policy,
            last_updated,
            archived_at,
        }
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_end
    }

    pub fn consumed_count(&self) -> u64 {
        self.consumed_count
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// True once `at` is past the period this counter covers
    pub fn has_ended(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_end
    }

    pub fn remaining(&self) -> Option<u64> {
        self.policy.remaining(self.consumed_count)
    }

    /// Conditionally add `n` requests
    ///
    /// Callers must hold whatever lock serializes access to this counter; the
    /// check and the increment are one step only under that lock.
    pub fn try_consume(&mut self, n: u64) -> ConsumeOutcome {
        let admitted = self.policy.allows(self.consumed_count, n);

        if admitted {
            self.consumed_count = self.consumed_count.saturating_add(n);
            self.last_updated = Utc::now();
        }

        let over_quota = admitted
            && self
                .policy
                .request_limit()
                .value()
                .is_some_and(|limit| self.consumed_count > limit);

        ConsumeOutcome {
            admitted,
            consumed: self.consumed_count,
            remaining: self.remaining(),
            over_quota,
            period_start: self.period_start,
            period_end: self.period_end,
        }
    }

    /// Retire the counter; it stays readable for historical reporting
    pub fn archive(&mut self, at: DateTime<Utc>) {
        if self.archived_at.is_none() {
            self.archived_at = Some(at);
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            subscription_id: self.subscription_id.clone(),
            period_start: self.period_start,
            period_end: self.period_end,
            consumed: self.consumed_count,
            limit: self.policy.request_limit().value(),
            remaining: self.remaining(),
            percent_used: self.policy.usage_percent(self.consumed_count),
            last_updated: self.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quota::OveragePolicy;

    fn counter(limit: u64) -> UsageCounter {
        let start = Utc::now();
        UsageCounter::open(
            SubscriptionId::new("sub-1").unwrap(),
            start,
            start + chrono::Duration::days(30),
            QuotaPolicy::limited(limit, 30).unwrap(),
        )
    }

    #[test]
    fn test_hard_deny_stops_at_limit() {
        let mut counter = counter(2);

        assert!(counter.try_consume(1).admitted);
        let second = counter.try_consume(1);
        assert!(second.admitted);
        assert_eq!(second.remaining, Some(0));

        let third = counter.try_consume(1);
        assert!(!third.admitted);
        assert_eq!(third.consumed, 2);
        assert_eq!(counter.consumed_count(), 2);
    }

    #[test]
    fn test_batch_consume_that_does_not_fit_is_rejected_whole() {
        let mut counter = counter(5);
        counter.try_consume(3);

        let outcome = counter.try_consume(3);
        assert!(!outcome.admitted);
        assert_eq!(outcome.consumed, 3);
        assert_eq!(outcome.remaining, Some(2));
    }

    #[test]
    fn test_soft_allow_flags_overage() {
        let start = Utc::now();
        let mut counter = UsageCounter::open(
            SubscriptionId::new("sub-1").unwrap(),
            start,
            start + chrono::Duration::days(30),
            QuotaPolicy::limited(1, 30)
                .unwrap()
                .with_overage(OveragePolicy::SoftAllow),
        );

        let first = counter.try_consume(1);
        assert!(first.admitted && !first.over_quota);

        let second = counter.try_consume(1);
        assert!(second.admitted);
        assert!(second.over_quota);
        assert_eq!(second.remaining, Some(0));
        assert_eq!(counter.consumed_count(), 2);
    }

    #[test]
    fn test_archive_is_sticky() {
        let mut counter = counter(10);
        let first = Utc::now();

        counter.archive(first);
        counter.archive(first + chrono::Duration::hours(1));

        assert_eq!(counter.archived_at(), Some(first));
    }

    #[test]
    fn test_snapshot_percent() {
        let mut counter = counter(200);
        counter.try_consume(50);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.consumed, 50);
        assert_eq!(snapshot.limit, Some(200));
        assert_eq!(snapshot.remaining, Some(150));
        assert_eq!(snapshot.percent_used, Some(25.0));
        assert_eq!(snapshot.period_end, counter.period_end());
    }

    #[test]
    fn test_has_ended_at_period_end() {
        let counter = counter(10);

        assert!(!counter.has_ended(counter.period_start()));
        assert!(counter.has_ended(counter.period_end()));
    }
}
