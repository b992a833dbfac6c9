//! In-memory usage counter store backed by a sharded concurrent map

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::quota::{
    ConsumeOutcome, QuotaPolicy, RolloverOutcome, UsageCounter, UsageCounterStore,
};
use crate::domain::subscription::SubscriptionId;
use crate::domain::DomainError;

/// Counter store for single-process deployments and tests
///
/// The active counter of a subscription lives in one map entry. Consuming and
/// rolling over both run under that entry's shard lock, so an increment can
/// never land in a period that has already been archived.
#[derive(Debug, Default)]
pub struct InMemoryUsageCounterStore {
    active: DashMap<SubscriptionId, UsageCounter>,
    archive: DashMap<SubscriptionId, Vec<UsageCounter>>,
}

impl InMemoryUsageCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageCounterStore for InMemoryUsageCounterStore {
    async fn try_consume(
        &self,
        subscription_id: &SubscriptionId,
        n: u64,
    ) -> Result<ConsumeOutcome, DomainError> {
        let mut counter = self.active.get_mut(subscription_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "No open usage period for subscription '{}'",
                subscription_id
            ))
        })?;

        if counter.has_ended(Utc::now()) {
            return Err(DomainError::not_found(format!(
                "Usage period of subscription '{}' ended at {}",
                subscription_id,
                counter.period_end()
            )));
        }

        Ok(counter.try_consume(n))
    }

    async fn current(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsageCounter>, DomainError> {
        Ok(self
            .active
            .get(subscription_id)
            .map(|counter| counter.value().clone()))
    }

    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageCounter>, DomainError> {
        if let Some(counter) = self.active.get(subscription_id) {
            if counter.period_start() == period_start {
                return Ok(Some(counter.value().clone()));
            }
        }

        Ok(self.archive.get(subscription_id).and_then(|history| {
            history
                .iter()
                .find(|c| c.period_start() == period_start)
                .cloned()
        }))
    }

    async fn archived(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<UsageCounter>, DomainError> {
        Ok(self
            .archive
            .get(subscription_id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }

    async fn open_period(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> Result<RolloverOutcome, DomainError> {
        let fresh =
            UsageCounter::open(subscription_id.clone(), period_start, period_end, *policy);

        match self.active.entry(subscription_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
                Ok(RolloverOutcome::Opened {
                    counter: fresh,
                    archived: None,
                })
            }
            Entry::Occupied(mut slot) => {
                let current_start = slot.get().period_start();
                if current_start >= period_start {
                    return Ok(RolloverOutcome::AlreadyCurrent {
                        period_start: current_start,
                    });
                }

                let mut retired = slot.insert(fresh.clone());
                retired.archive(Utc::now());

                // Archive while still holding the active entry
                self.archive
                    .entry(subscription_id.clone())
                    .or_default()
                    .push(retired.clone());

                Ok(RolloverOutcome::Opened {
                    counter: fresh,
                    archived: Some(retired),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::quota::OveragePolicy;

    fn sub(id: &str) -> SubscriptionId {
        SubscriptionId::new(id).unwrap()
    }

    async fn open(
        store: &InMemoryUsageCounterStore,
        id: &SubscriptionId,
        start: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> RolloverOutcome {
        store
            .open_period(id, start, policy.next_period_start(start), policy)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_consume_without_open_period_is_not_found() {
        let store = InMemoryUsageCounterStore::new();

        let result = store.try_consume(&sub("sub-1"), 1).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_consume_after_period_end_is_not_found() {
        let store = InMemoryUsageCounterStore::new();
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(10, 30).unwrap();

        open(&store, &id, Utc::now() - chrono::Duration::days(31), &policy).await;

        let result = store.try_consume(&id, 1).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
        assert_eq!(store.current(&id).await.unwrap().unwrap().consumed_count(), 0);
    }

    #[tokio::test]
    async fn test_limit_then_rollover_scenario() {
        let store = InMemoryUsageCounterStore::new();
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(100, 30).unwrap();
        let start = Utc::now();

        open(&store, &id, start, &policy).await;

        for _ in 0..100 {
            assert!(store.try_consume(&id, 1).await.unwrap().admitted);
        }

        let denied = store.try_consume(&id, 1).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.consumed, 100);

        let next = policy.next_period_start(start);
        let outcome = open(&store, &id, next, &policy).await;
        assert!(outcome.is_opened());

        let admitted = store.try_consume(&id, 1).await.unwrap();
        assert!(admitted.admitted);
        assert_eq!(admitted.remaining, Some(99));
        assert_eq!(admitted.period_start, next);

        let old = store.get(&id, start).await.unwrap().unwrap();
        assert_eq!(old.consumed_count(), 100);
        assert!(old.is_archived());
    }

    #[tokio::test]
    async fn test_double_rollover_creates_one_counter() {
        let store = InMemoryUsageCounterStore::new();
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(10, 30).unwrap();
        let start = Utc::now();
        let next = policy.next_period_start(start);

        open(&store, &id, start, &policy).await;
        store.try_consume(&id, 4).await.unwrap();

        let first = open(&store, &id, next, &policy).await;
        let second = open(&store, &id, next, &policy).await;

        assert!(first.is_opened());
        assert_eq!(
            second,
            RolloverOutcome::AlreadyCurrent { period_start: next }
        );

        let history = store.archived(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].consumed_count(), 4);
        assert_eq!(store.current(&id).await.unwrap().unwrap().consumed_count(), 0);
    }

    #[tokio::test]
    async fn test_rollover_to_older_period_is_ignored() {
        let store = InMemoryUsageCounterStore::new();
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(10, 30).unwrap();
        let start = Utc::now();

        open(&store, &id, start, &policy).await;

        let outcome = open(&store, &id, start - chrono::Duration::days(30), &policy).await;

        assert!(!outcome.is_opened());
        assert!(store.archived(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_allow_counts_overage() {
        let store = InMemoryUsageCounterStore::new();
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(1, 30)
            .unwrap()
            .with_overage(OveragePolicy::SoftAllow);

        open(&store, &id, Utc::now(), &policy).await;
        store.try_consume(&id, 1).await.unwrap();

        let outcome = store.try_consume(&id, 1).await.unwrap();
        assert!(outcome.admitted);
        assert!(outcome.over_quota);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_consume_never_exceeds_limit() {
        let store = Arc::new(InMemoryUsageCounterStore::new());
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(250, 30).unwrap();

        open(&store, &id, Utc::now(), &policy).await;

        let handles: Vec<_> = (0..400)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.try_consume(&id, 1).await.unwrap().admitted })
            })
            .collect();

        let mut admitted = 0u64;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        let counter = store.current(&id).await.unwrap().unwrap();
        assert_eq!(admitted, 250);
        assert_eq!(counter.consumed_count(), admitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_rollover_racing_consume_counts_each_request_once() {
        let store = Arc::new(InMemoryUsageCounterStore::new());
        let id = sub("sub-1");
        let policy = QuotaPolicy::limited(10_000, 30).unwrap();
        let start = Utc::now();
        let next = policy.next_period_start(start);

        open(&store, &id, start, &policy).await;

        let consumers: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.try_consume(&id, 1).await.unwrap().admitted })
            })
            .collect();

        let roller = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { open(&store, &id, next, &policy).await })
        };

        let mut admitted = 0u64;
        for handle in consumers {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        roller.await.unwrap();

        let old = store.get(&id, start).await.unwrap().unwrap();
        let new = store.current(&id).await.unwrap().unwrap();
        assert_eq!(old.consumed_count() + new.consumed_count(), admitted);
        assert_eq!(admitted, 200);
    }
}
