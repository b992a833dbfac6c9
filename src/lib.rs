//! API Metering
//!
//! Usage metering and quota enforcement for marketplace APIs:
//! - API keys bound to buyer subscriptions
//! - Per-key token bucket rate limiting
//! - Per-subscription request quotas with periodic resets
//! - At-least-once usage events for billing sinks

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use axum::http::StatusCode;
use sqlx::PgPool;

use api::state::AppState;
use domain::{ApiKeyRepository, SubscriptionRepository, UsageCounterStore, UsageEventSink};
use infrastructure::{
    api_key::{ApiKeyService, StorageApiKeyRepository},
    metering::{
        ApiKeyActivityRecorder, LoggingUsageEventSink, MeteringGateway, PeriodResetScheduler,
        UsageEventPublisher,
    },
    rate_limit::{InMemoryRateLimitStore, RateLimiter},
    storage::{StorageBackends, StorageConfig, StorageFactory},
    subscription::{StorageSubscriptionRepository, SubscriptionService},
};

/// Repositories shared by the services and the background workers
#[derive(Debug, Clone)]
pub struct Repositories {
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub counters: Arc<dyn UsageCounterStore>,
    pub pool: Option<PgPool>,
}

impl Repositories {
    pub fn from_backends(backends: StorageBackends) -> Self {
        Self {
            api_keys: Arc::new(StorageApiKeyRepository::new(backends.api_keys)),
            subscriptions: Arc::new(StorageSubscriptionRepository::new(backends.subscriptions)),
            counters: backends.counters,
            pool: backends.pool,
        }
    }

    /// Connect to the configured storage backend
    pub async fn connect(config: &StorageConfig) -> anyhow::Result<Self> {
        let backends = StorageFactory::build(config).await?;
        Ok(Self::from_backends(backends))
    }

    pub fn in_memory() -> Self {
        Self::from_backends(StorageFactory::in_memory())
    }
}

/// Sinks every deployment delivers usage events to
pub fn default_event_sinks(repositories: &Repositories) -> Vec<Arc<dyn UsageEventSink>> {
    vec![
        Arc::new(LoggingUsageEventSink),
        Arc::new(ApiKeyActivityRecorder::new(repositories.api_keys.clone())),
    ]
}

/// Wire services, gateway and scheduler into the HTTP state
pub fn build_app_state(
    config: &AppConfig,
    repositories: &Repositories,
    events: UsageEventPublisher,
) -> AppState {
    let metering = &config.metering;

    let rate_limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), metering.rate_limit);

    let api_keys = ApiKeyService::new(
        repositories.api_keys.clone(),
        repositories.subscriptions.clone(),
        rate_limiter.clone(),
    );

    let subscriptions = SubscriptionService::new(
        repositories.subscriptions.clone(),
        repositories.counters.clone(),
    )
    .with_default_policy(metering.default_policy);

    let gateway = MeteringGateway::new(
        api_keys.clone(),
        repositories.subscriptions.clone(),
        repositories.counters.clone(),
        rate_limiter,
        events,
    )
    .with_config(metering.gateway());

    let scheduler = Arc::new(PeriodResetScheduler::new(
        repositories.subscriptions.clone(),
        repositories.counters.clone(),
    ));

    let quota_exceeded_status = StatusCode::from_u16(metering.quota_exceeded_status.as_u16())
        .unwrap_or(StatusCode::TOO_MANY_REQUESTS);

    let state = AppState::new(gateway, api_keys, subscriptions, scheduler)
        .with_quota_exceeded_status(quota_exceeded_status)
        .with_pool(repositories.pool.clone());

    match config.server.admin_token.as_deref() {
        Some(token) if !token.is_empty() => state.with_admin_token(token),
        _ => state,
    }
}
