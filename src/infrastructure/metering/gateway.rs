//! Metering gateway
//!
//! The admission decision for one request: key validity, then the per-key
//! token bucket, then the per-subscription quota. Every admitted request
//! produces a usage event; denied requests never touch the quota.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::api_key::{ApiKey, ApiKeyId};
use crate::domain::metering::{FailureMode, UsageEvent, Verdict};
use crate::domain::quota::{ConsumeOutcome, UsageCounterStore};
use crate::domain::subscription::{Subscription, SubscriptionRepository};
use crate::domain::DomainError;
use crate::infrastructure::api_key::ApiKeyService;
use crate::infrastructure::observability::{record_store_failure, record_verdict};
use crate::infrastructure::rate_limit::RateLimiter;

use super::dispatcher::UsageEventPublisher;

/// Store deadlines and degraded-mode behaviour
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deadline for every individual store call
    pub store_timeout_ms: u64,
    pub quota_failure_mode: FailureMode,
    pub rate_limit_failure_mode: FailureMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 250,
            quota_failure_mode: FailureMode::FailClosed,
            rate_limit_failure_mode: FailureMode::FailOpen,
        }
    }
}

impl GatewayConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }
}

/// Admission control for metered requests
#[derive(Debug, Clone)]
pub struct MeteringGateway {
    api_keys: ApiKeyService,
    subscriptions: Arc<dyn SubscriptionRepository>,
    counters: Arc<dyn UsageCounterStore>,
    rate_limiter: RateLimiter,
    events: UsageEventPublisher,
    config: GatewayConfig,
}

impl MeteringGateway {
    pub fn new(
        api_keys: ApiKeyService,
        subscriptions: Arc<dyn SubscriptionRepository>,
        counters: Arc<dyn UsageCounterStore>,
        rate_limiter: RateLimiter,
        events: UsageEventPublisher,
    ) -> Self {
        Self {
            api_keys,
            subscriptions,
            counters,
            rate_limiter,
            events,
            config: GatewayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Decide on a request made with the key `api_key_id`
    ///
    /// An `Err` means the decision could not be made (a store is down and
    /// the relevant check fails closed); it is never a denial.
    pub async fn admit(&self, api_key_id: &ApiKeyId) -> Result<Verdict, DomainError> {
        let started = Instant::now();
        let api_key = self
            .bounded("api_key", self.api_keys.get(api_key_id))
            .await
            .inspect_err(|e| self.lookup_failed(e))?;

        self.decide(api_key, started).await
    }

    /// Decide on a request that presented the plaintext secret `secret`
    pub async fn admit_secret(&self, secret: &str) -> Result<Verdict, DomainError> {
        let started = Instant::now();
        let api_key = self
            .bounded("api_key", self.api_keys.resolve_secret(secret))
            .await
            .inspect_err(|e| self.lookup_failed(e))?;

        self.decide(api_key, started).await
    }

    async fn decide(
        &self,
        api_key: Option<ApiKey>,
        started: Instant,
    ) -> Result<Verdict, DomainError> {
        let verdict = self.evaluate(api_key).await?;
        record_verdict(&verdict, started.elapsed());
        Ok(verdict)
    }

    async fn evaluate(&self, api_key: Option<ApiKey>) -> Result<Verdict, DomainError> {
        let Some(api_key) = api_key.filter(ApiKey::is_valid) else {
            return Ok(Verdict::DenyKeyInvalid);
        };

        let subscription = self
            .bounded(
                "subscription",
                self.subscriptions.get(api_key.subscription_id()),
            )
            .await
            .inspect_err(|e| self.lookup_failed(e))?;

        let Some(subscription) = subscription.filter(Subscription::is_active) else {
            debug!(
                api_key_id = %api_key.id(),
                subscription_id = %api_key.subscription_id(),
                "Subscription missing or not active"
            );
            return Ok(Verdict::DenyKeyInvalid);
        };

        if let Some(verdict) = self.check_rate_limit(&api_key).await? {
            return Ok(verdict);
        }

        let verdict = match self.consume(&subscription).await? {
            Some(outcome) if !outcome.admitted => Verdict::DenyQuotaExceeded {
                period_end: outcome.period_end,
            },
            Some(outcome) => {
                self.emit(
                    UsageEvent::new(
                        api_key.id().clone(),
                        subscription.id().clone(),
                        Some(outcome.period_start),
                    )
                    .with_over_quota(outcome.over_quota),
                );
                Verdict::Allow {
                    remaining: outcome.remaining,
                    over_quota: outcome.over_quota,
                    under_counted: false,
                }
            }
            None => {
                self.emit(
                    UsageEvent::new(api_key.id().clone(), subscription.id().clone(), None)
                        .with_under_counted(true),
                );
                Verdict::Allow {
                    remaining: None,
                    over_quota: false,
                    under_counted: true,
                }
            }
        };

        Ok(verdict)
    }

    /// `Some(verdict)` when the bucket denies the request
    async fn check_rate_limit(&self, api_key: &ApiKey) -> Result<Option<Verdict>, DomainError> {
        match self
            .bounded("rate_limit", self.rate_limiter.check(api_key))
            .await
        {
            Ok(decision) if decision.admitted => Ok(None),
            Ok(decision) => Ok(Some(Verdict::DenyRateLimited {
                retry_after: decision.retry_after.unwrap_or(Duration::ZERO),
            })),
            Err(e) if e.is_unavailable() => {
                let mode = self.config.rate_limit_failure_mode;
                record_store_failure("rate_limit", mode);
                warn!(
                    api_key_id = %api_key.id(),
                    mode = %mode,
                    error = %e,
                    "Rate limit store unavailable"
                );

                if mode.is_open() {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Count one request; `None` means the quota store was skipped (fail-open)
    async fn consume(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<ConsumeOutcome>, DomainError> {
        let id = subscription.id();

        let result = match self.bounded("quota", self.counters.try_consume(id, 1)).await {
            Err(DomainError::NotFound { .. }) => self.open_and_consume(subscription).await,
            other => other,
        };

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_unavailable() => {
                let mode = self.config.quota_failure_mode;
                record_store_failure("quota", mode);
                warn!(subscription_id = %id, mode = %mode, error = %e, "Quota store unavailable");

                if mode.is_open() {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Open the period `now` falls in, then retry the increment once
    ///
    /// Reached when no counter is open or the open one has ended before the
    /// scheduler rolled it over.
    async fn open_and_consume(
        &self,
        subscription: &Subscription,
    ) -> Result<ConsumeOutcome, DomainError> {
        let id = subscription.id();
        let period_start = subscription.period_start_at(Utc::now());
        let policy = subscription.policy_for(period_start);
        let period_end = subscription.period_end_for(period_start, &policy);

        let opened = self
            .bounded(
                "quota",
                self.counters
                    .open_period(id, period_start, period_end, &policy),
            )
            .await?;
        debug!(
            subscription_id = %id,
            period_start = %period_start,
            opened = opened.is_opened(),
            "Opened usage period on demand"
        );

        if opened.is_opened() && period_start > subscription.current_period_start() {
            let advanced = self
                .bounded(
                    "subscription",
                    self.subscriptions.advance_period(id, period_start, policy),
                )
                .await;
            if let Err(e) = advanced {
                warn!(
                    subscription_id = %id,
                    error = %e,
                    "Failed to record on-demand period; the scheduler will catch up"
                );
            }
        }

        self.bounded("quota", self.counters.try_consume(id, 1)).await
    }

    fn emit(&self, event: UsageEvent) {
        self.events.publish(event);
    }

    fn lookup_failed(&self, error: &DomainError) {
        if error.is_unavailable() {
            record_store_failure("api_key", FailureMode::FailClosed);
            warn!(error = %error, "Key or subscription lookup failed");
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, DomainError>>,
    ) -> Result<T, DomainError> {
        let timeout = self.config.store_timeout();

        tokio::time::timeout(timeout, future)
            .await
            .unwrap_or_else(|_| {
                Err(DomainError::unavailable(format!(
                    "{} store timed out after {}ms",
                    operation,
                    timeout.as_millis()
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::DateTime;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::api_key::ApiKeyRepository;
    use crate::domain::quota::{QuotaPolicy, RolloverOutcome, UsageCounter};
    use crate::domain::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStore};
    use crate::domain::subscription::SubscriptionId;
    use crate::infrastructure::api_key::{IssueApiKeyRequest, StorageApiKeyRepository};
    use crate::infrastructure::quota::InMemoryUsageCounterStore;
    use crate::infrastructure::rate_limit::InMemoryRateLimitStore;
    use crate::infrastructure::storage::InMemoryStorage;
    use crate::infrastructure::subscription::{
        StorageSubscriptionRepository, SubscribeRequest, SubscriptionService,
    };

    /// Counter store whose backend is down
    #[derive(Debug)]
    struct UnreachableCounters;

    #[async_trait]
    impl UsageCounterStore for UnreachableCounters {
        async fn try_consume(
            &self,
            _subscription_id: &SubscriptionId,
            _n: u64,
        ) -> Result<ConsumeOutcome, DomainError> {
            Err(DomainError::unavailable("connection refused"))
        }

        async fn current(
            &self,
            _subscription_id: &SubscriptionId,
        ) -> Result<Option<UsageCounter>, DomainError> {
            Err(DomainError::unavailable("connection refused"))
        }

        async fn get(
            &self,
            _subscription_id: &SubscriptionId,
            _period_start: DateTime<Utc>,
        ) -> Result<Option<UsageCounter>, DomainError> {
            Err(DomainError::unavailable("connection refused"))
        }

        async fn archived(
            &self,
            _subscription_id: &SubscriptionId,
        ) -> Result<Vec<UsageCounter>, DomainError> {
            Err(DomainError::unavailable("connection refused"))
        }

        async fn open_period(
            &self,
            _subscription_id: &SubscriptionId,
            _period_start: DateTime<Utc>,
            _period_end: DateTime<Utc>,
            _policy: &QuotaPolicy,
        ) -> Result<RolloverOutcome, DomainError> {
            Err(DomainError::unavailable("connection refused"))
        }
    }

    /// Bucket store that never answers in time
    #[derive(Debug)]
    struct StalledBuckets;

    #[async_trait]
    impl RateLimitStore for StalledBuckets {
        async fn take(
            &self,
            _key: &str,
            _config: &RateLimitConfig,
        ) -> Result<RateLimitDecision, DomainError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RateLimitDecision::allow())
        }

        async fn reset(&self, _key: &str) -> Result<(), DomainError> {
            Ok(())
        }
    }

    struct Harness {
        gateway: MeteringGateway,
        api_keys: ApiKeyService,
        subscriptions: SubscriptionService,
        counters: Arc<InMemoryUsageCounterStore>,
        events: mpsc::UnboundedReceiver<UsageEvent>,
    }

    fn harness_with(
        rate_limits: RateLimitConfig,
        buckets: Arc<dyn RateLimitStore>,
        counters_override: Option<Arc<dyn UsageCounterStore>>,
    ) -> Harness {
        let subscription_repo: Arc<dyn SubscriptionRepository> = Arc::new(
            StorageSubscriptionRepository::new(Arc::new(InMemoryStorage::<Subscription>::new())),
        );
        let key_repo: Arc<dyn ApiKeyRepository> = Arc::new(StorageApiKeyRepository::new(
            Arc::new(InMemoryStorage::<ApiKey>::new()),
        ));
        let counters = Arc::new(InMemoryUsageCounterStore::new());
        let rate_limiter = RateLimiter::new(buckets, rate_limits);

        let api_keys = ApiKeyService::new(key_repo, subscription_repo.clone(), rate_limiter.clone());
        let subscriptions = SubscriptionService::new(subscription_repo.clone(), counters.clone());
        let (publisher, events) = UsageEventPublisher::detached();

        let gateway_counters =
            counters_override.unwrap_or_else(|| counters.clone() as Arc<dyn UsageCounterStore>);
        let gateway = MeteringGateway::new(
            api_keys.clone(),
            subscription_repo,
            gateway_counters,
            rate_limiter,
            publisher,
        );

        Harness {
            gateway,
            api_keys,
            subscriptions,
            counters,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(
            RateLimitConfig::disabled(),
            Arc::new(InMemoryRateLimitStore::new()),
            None,
        )
    }

    impl Harness {
        /// Subscribe with `limit` requests per 30 days and issue one key
        async fn subscriber(&self, limit: u64) -> (Subscription, String) {
            let subscription = self
                .subscriptions
                .subscribe(
                    SubscribeRequest::new("buyer-1", "weather-api")
                        .with_policy(QuotaPolicy::limited(limit, 30).unwrap()),
                )
                .await
                .unwrap();

            let issued = self
                .api_keys
                .issue(IssueApiKeyRequest::new(subscription.id().clone(), "Production"))
                .await
                .unwrap();

            (subscription, issued.secret)
        }

        async fn consumed(&self, subscription: &Subscription) -> u64 {
            self.counters
                .current(subscription.id())
                .await
                .unwrap()
                .map(|c| c.consumed_count())
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn test_allow_reports_remaining_and_emits_event() {
        let mut h = harness();
        let (subscription, secret) = h.subscriber(10).await;

        let verdict = h.gateway.admit_secret(&secret).await.unwrap();

        assert_eq!(verdict, Verdict::allow(Some(9)));
        let event = h.events.try_recv().unwrap();
        assert_eq!(&event.subscription_id, subscription.id());
        assert_eq!(event.period_start, Some(subscription.current_period_start()));
        assert!(!event.under_counted);
    }

    #[tokio::test]
    async fn test_unknown_secret_is_key_invalid() {
        let h = harness();
        h.subscriber(10).await;

        let verdict = h.gateway.admit_secret("veil_sk_not-a-real-key").await.unwrap();
        assert_eq!(verdict, Verdict::DenyKeyInvalid);

        let verdict = h
            .gateway
            .admit(&ApiKeyId::new("key-404").unwrap())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::DenyKeyInvalid);
    }

    #[tokio::test]
    async fn test_revoked_key_is_denied_on_next_request() {
        let mut h = harness();
        let (subscription, secret) = h.subscriber(10).await;

        assert!(h.gateway.admit_secret(&secret).await.unwrap().is_allowed());

        let key = h.api_keys.resolve_secret(&secret).await.unwrap().unwrap();
        h.api_keys.revoke(key.id()).await.unwrap();

        assert_eq!(
            h.gateway.admit_secret(&secret).await.unwrap(),
            Verdict::DenyKeyInvalid
        );
        assert_eq!(
            h.gateway.admit(key.id()).await.unwrap(),
            Verdict::DenyKeyInvalid
        );
        assert_eq!(h.consumed(&subscription).await, 1);

        h.events.try_recv().unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_regenerated_secret_replaces_old_one() {
        let h = harness();
        let (_, old_secret) = h.subscriber(10).await;

        let key = h.api_keys.resolve_secret(&old_secret).await.unwrap().unwrap();
        let rotated = h.api_keys.regenerate(key.id()).await.unwrap();

        assert_eq!(
            h.gateway.admit_secret(&old_secret).await.unwrap(),
            Verdict::DenyKeyInvalid
        );
        assert!(h.gateway.admit_secret(&rotated.secret).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_suspended_subscription_is_key_invalid() {
        let h = harness();
        let (subscription, secret) = h.subscriber(10).await;

        h.subscriptions.suspend(subscription.id()).await.unwrap();
        assert_eq!(
            h.gateway.admit_secret(&secret).await.unwrap(),
            Verdict::DenyKeyInvalid
        );

        h.subscriptions.resume(subscription.id()).await.unwrap();
        assert!(h.gateway.admit_secret(&secret).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_parallel_admits_deny_exactly_one() {
        let h = harness();
        let (subscription, secret) = h.subscriber(49).await;
        let gateway = Arc::new(h.gateway.clone());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let gateway = gateway.clone();
                let secret = secret.clone();
                tokio::spawn(async move { gateway.admit_secret(&secret).await.unwrap() })
            })
            .collect();

        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Verdict::DenyQuotaExceeded { period_end } => {
                    assert!(period_end > subscription.current_period_start());
                    denied += 1;
                }
                verdict => assert!(verdict.is_allowed()),
            }
        }

        assert_eq!(denied, 1);
        assert_eq!(h.consumed(&subscription).await, 49);
    }

    #[tokio::test]
    async fn test_rate_limited_request_leaves_quota_untouched() {
        let h = harness_with(
            RateLimitConfig::new(2, 0.001),
            Arc::new(InMemoryRateLimitStore::new()),
            None,
        );
        let (subscription, secret) = h.subscriber(100).await;

        assert!(h.gateway.admit_secret(&secret).await.unwrap().is_allowed());
        assert!(h.gateway.admit_secret(&secret).await.unwrap().is_allowed());

        let verdict = h.gateway.admit_secret(&secret).await.unwrap();
        match verdict {
            Verdict::DenyRateLimited { retry_after } => assert!(retry_after > Duration::ZERO),
            other => panic!("expected rate limit denial, got {:?}", other),
        }
        assert!(verdict.is_retryable());
        assert_eq!(h.consumed(&subscription).await, 2);
    }

    #[tokio::test]
    async fn test_quota_store_down_fails_closed_by_default() {
        let h = harness_with(
            RateLimitConfig::disabled(),
            Arc::new(InMemoryRateLimitStore::new()),
            Some(Arc::new(UnreachableCounters)),
        );
        let (_, secret) = h.subscriber(10).await;

        let result = h.gateway.admit_secret(&secret).await;
        assert!(matches!(result, Err(DomainError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_quota_store_down_fail_open_marks_under_counted() {
        let h = harness_with(
            RateLimitConfig::disabled(),
            Arc::new(InMemoryRateLimitStore::new()),
            Some(Arc::new(UnreachableCounters)),
        );
        let (_, secret) = h.subscriber(10).await;
        let mut events = h.events;
        let gateway = h.gateway.with_config(GatewayConfig {
            quota_failure_mode: FailureMode::FailOpen,
            ..GatewayConfig::default()
        });

        let verdict = gateway.admit_secret(&secret).await.unwrap();

        assert_eq!(
            verdict,
            Verdict::Allow {
                remaining: None,
                over_quota: false,
                under_counted: true,
            }
        );
        let event = events.try_recv().unwrap();
        assert!(event.under_counted);
        assert_eq!(event.period_start, None);
    }

    #[tokio::test]
    async fn test_stalled_rate_limit_store_times_out_and_fails_open() {
        let h = harness_with(RateLimitConfig::default(), Arc::new(StalledBuckets), None);
        let (subscription, secret) = h.subscriber(10).await;
        let gateway = h.gateway.clone().with_config(GatewayConfig {
            store_timeout_ms: 20,
            ..GatewayConfig::default()
        });

        let verdict = gateway.admit_secret(&secret).await.unwrap();
        assert_eq!(verdict, Verdict::allow(Some(9)));
        assert_eq!(h.consumed(&subscription).await, 1);
    }

    #[tokio::test]
    async fn test_stalled_rate_limit_store_fail_closed_is_unavailable() {
        let h = harness_with(RateLimitConfig::default(), Arc::new(StalledBuckets), None);
        let (subscription, secret) = h.subscriber(10).await;
        let gateway = h.gateway.clone().with_config(GatewayConfig {
            store_timeout_ms: 20,
            rate_limit_failure_mode: FailureMode::FailClosed,
            ..GatewayConfig::default()
        });

        let result = gateway.admit_secret(&secret).await;
        assert!(matches!(result, Err(DomainError::Unavailable { .. })));
        assert_eq!(h.consumed(&subscription).await, 0);
    }

    #[tokio::test]
    async fn test_missing_period_is_opened_on_demand() {
        let h = harness();
        let (subscription, secret) = h.subscriber(10).await;

        // A store that lost its active counters
        let fresh = Arc::new(InMemoryUsageCounterStore::new());
        let gateway = MeteringGateway::new(
            h.api_keys.clone(),
            Arc::new(StorageSubscriptionRepository::new(Arc::new(
                InMemoryStorage::<Subscription>::new(),
            ))),
            fresh.clone(),
            RateLimiter::new(
                Arc::new(InMemoryRateLimitStore::new()),
                RateLimitConfig::disabled(),
            ),
            UsageEventPublisher::detached().0,
        );
        gateway.subscriptions.create(subscription.clone()).await.unwrap();

        let verdict = gateway.admit_secret(&secret).await.unwrap();

        assert_eq!(verdict, Verdict::allow(Some(9)));
        let counter = fresh.current(subscription.id()).await.unwrap().unwrap();
        assert_eq!(counter.period_start(), subscription.current_period_start());
        assert_eq!(counter.consumed_count(), 1);
    }

    #[tokio::test]
    async fn test_request_after_period_end_counts_in_new_period() {
        let mut h = harness();
        let start = Utc::now() - chrono::Duration::days(31);
        let mut request = SubscribeRequest::new("buyer-1", "weather-api")
            .with_policy(QuotaPolicy::limited(1, 30).unwrap());
        request.period_start = Some(start);
        let subscription = h.subscriptions.subscribe(request).await.unwrap();
        let issued = h
            .api_keys
            .issue(IssueApiKeyRequest::new(subscription.id().clone(), "k"))
            .await
            .unwrap();
        let next = start + chrono::Duration::days(30);

        // No scheduler pass has run since the period ended
        let verdict = h.gateway.admit_secret(&issued.secret).await.unwrap();
        assert_eq!(verdict, Verdict::allow(Some(0)));
        assert_eq!(h.events.try_recv().unwrap().period_start, Some(next));

        let current = h.counters.current(subscription.id()).await.unwrap().unwrap();
        assert_eq!(current.period_start(), next);
        assert_eq!(current.consumed_count(), 1);
        let archived = h.counters.archived(subscription.id()).await.unwrap();
        assert_eq!(archived[0].consumed_count(), 0);

        let stored = h.subscriptions.get(subscription.id()).await.unwrap().unwrap();
        assert_eq!(stored.current_period_start(), next);

        match h.gateway.admit_secret(&issued.secret).await.unwrap() {
            Verdict::DenyQuotaExceeded { period_end } => {
                assert!(period_end > Utc::now());
                assert_eq!(period_end, next + chrono::Duration::days(30));
            }
            other => panic!("expected quota denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_soft_allow_admits_past_limit() {
        let h = harness();
        let subscription = h
            .subscriptions
            .subscribe(
                SubscribeRequest::new("buyer-1", "weather-api").with_policy(
                    QuotaPolicy::limited(1, 30)
                        .unwrap()
                        .with_overage(crate::domain::quota::OveragePolicy::SoftAllow),
                ),
            )
            .await
            .unwrap();
        let issued = h
            .api_keys
            .issue(IssueApiKeyRequest::new(subscription.id().clone(), "k"))
            .await
            .unwrap();

        assert_eq!(
            h.gateway.admit_secret(&issued.secret).await.unwrap(),
            Verdict::allow(Some(0))
        );
        let verdict = h.gateway.admit_secret(&issued.secret).await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Allow {
                remaining: Some(0),
                over_quota: true,
                under_counted: false,
            }
        );
    }
}
