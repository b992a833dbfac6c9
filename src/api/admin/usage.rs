//! Usage and period admin endpoints

use axum::extract::{Path, State};
use chrono::Utc;
use serde::Serialize;

use crate::api::middleware::RequireAdmin;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::quota::UsageSnapshot;
use crate::infrastructure::metering::RolloverReport;

use super::subscriptions::parse_subscription_id;

#[derive(Debug, Clone, Serialize)]
pub struct UsageHistoryResponse {
    pub periods: Vec<UsageSnapshot>,
    pub total: usize,
}

/// GET /admin/subscriptions/{subscription_id}/usage
pub async fn get_usage(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<UsageSnapshot>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    Ok(Json(state.subscriptions.usage(&id).await?))
}

/// GET /admin/subscriptions/{subscription_id}/usage/history
pub async fn get_usage_history(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<UsageHistoryResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    let periods = state.subscriptions.usage_history(&id).await?;

    Ok(Json(UsageHistoryResponse {
        total: periods.len(),
        periods,
    }))
}

/// POST /admin/rollover
///
/// Run one scheduler pass now instead of waiting for the next tick.
pub async fn trigger_rollover(
    State(state): State<AppState>,
    _: RequireAdmin,
) -> Result<Json<RolloverReport>, ApiError> {
    Ok(Json(state.scheduler.run_once(Utc::now()).await?))
}
