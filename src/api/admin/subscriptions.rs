//! Subscription management admin endpoints

use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::middleware::RequireAdmin;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::quota::QuotaPolicy;
use crate::domain::subscription::{Subscription, SubscriptionId, SubscriptionStatus};
use crate::infrastructure::subscription::SubscribeRequest;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub buyer_id: String,
    pub listing_id: String,
    #[serde(default)]
    pub policy: Option<QuotaPolicy>,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulePolicyRequest {
    pub policy: QuotaPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSubscriptionsQuery {
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub buyer_id: String,
    pub listing_id: String,
    pub status: SubscriptionStatus,
    pub policy: QuotaPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_policy: Option<QuotaPolicy>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id().to_string(),
            buyer_id: sub.buyer_id().to_string(),
            listing_id: sub.listing_id().to_string(),
            status: sub.status(),
            policy: *sub.policy(),
            pending_policy: sub.pending_policy().copied(),
            current_period_start: sub.current_period_start(),
            current_period_end: sub.current_period_end(),
            created_at: sub.created_at(),
            updated_at: sub.updated_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionResponse>,
    pub total: usize,
}

pub(super) fn parse_subscription_id(raw: &str) -> Result<SubscriptionId, ApiError> {
    SubscriptionId::new(raw).map_err(|e| ApiError::bad_request(e.to_string()).with_code("invalid_id"))
}

/// POST /admin/subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    _: RequireAdmin,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    debug!(buyer_id = %request.buyer_id, listing_id = %request.listing_id, "Admin creating subscription");

    let mut subscribe = SubscribeRequest::new(request.buyer_id, request.listing_id);
    subscribe.policy = request.policy;
    subscribe.period_start = request.period_start;

    let created = state.subscriptions.subscribe(subscribe).await?;
    Ok(Json(SubscriptionResponse::from(&created)))
}

/// GET /admin/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    _: RequireAdmin,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<ListSubscriptionsResponse>, ApiError> {
    let subscriptions: Vec<SubscriptionResponse> = state
        .subscriptions
        .list(query.status)
        .await?
        .iter()
        .map(SubscriptionResponse::from)
        .collect();

    Ok(Json(ListSubscriptionsResponse {
        total: subscriptions.len(),
        subscriptions,
    }))
}

/// GET /admin/subscriptions/{subscription_id}
pub async fn get_subscription(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;

    let subscription = state
        .subscriptions
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Subscription '{}' not found", id)))?;

    Ok(Json(SubscriptionResponse::from(&subscription)))
}

/// POST /admin/subscriptions/{subscription_id}/suspend
pub async fn suspend_subscription(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    let updated = state.subscriptions.suspend(&id).await?;
    Ok(Json(SubscriptionResponse::from(&updated)))
}

/// POST /admin/subscriptions/{subscription_id}/resume
pub async fn resume_subscription(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    let updated = state.subscriptions.resume(&id).await?;
    Ok(Json(SubscriptionResponse::from(&updated)))
}

/// POST /admin/subscriptions/{subscription_id}/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    let updated = state.subscriptions.cancel(&id).await?;
    Ok(Json(SubscriptionResponse::from(&updated)))
}

/// PUT /admin/subscriptions/{subscription_id}/policy
///
/// The new policy applies from the next period boundary.
pub async fn schedule_policy(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
    Json(request): Json<SchedulePolicyRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = parse_subscription_id(&subscription_id)?;
    let updated = state.subscriptions.schedule_policy(&id, request.policy).await?;
    Ok(Json(SubscriptionResponse::from(&updated)))
}
