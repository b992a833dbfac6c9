//! Application state for shared services

use std::sync::Arc;

use axum::http::StatusCode;
use sqlx::PgPool;

use crate::infrastructure::api_key::ApiKeyService;
use crate::infrastructure::metering::{MeteringGateway, PeriodResetScheduler};
use crate::infrastructure::subscription::SubscriptionService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub gateway: MeteringGateway,
    pub api_keys: ApiKeyService,
    pub subscriptions: SubscriptionService,
    pub scheduler: Arc<PeriodResetScheduler>,
    /// 429 or 402, returned when a hard quota is exhausted
    pub quota_exceeded_status: StatusCode,
    /// Bearer token for `/admin`; `None` disables the admin routes
    pub admin_token: Option<Arc<str>>,
    /// Present with PostgreSQL storage; pinged by `/ready`
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        gateway: MeteringGateway,
        api_keys: ApiKeyService,
        subscriptions: SubscriptionService,
        scheduler: Arc<PeriodResetScheduler>,
    ) -> Self {
        Self {
            gateway,
            api_keys,
            subscriptions,
            scheduler,
            quota_exceeded_status: StatusCode::TOO_MANY_REQUESTS,
            admin_token: None,
            pool: None,
        }
    }

    pub fn with_quota_exceeded_status(mut self, status: StatusCode) -> Self {
        self.quota_exceeded_status = status;
        self
    }

    pub fn with_admin_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn with_pool(mut self, pool: Option<PgPool>) -> Self {
        self.pool = pool;
        self
    }
}
