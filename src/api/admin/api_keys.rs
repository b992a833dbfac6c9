//! API key management admin endpoints

use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::middleware::RequireAdmin;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyStatus};
use crate::domain::rate_limit::RateLimitConfig;
use crate::infrastructure::api_key::{IssueApiKeyRequest, IssuedApiKey};

use super::subscriptions::parse_subscription_id;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub rate_limits: Option<RateLimitConfig>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameApiKeyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRateLimitsRequest {
    /// `null` falls back to the service defaults
    pub rate_limits: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub subscription_id: String,
    pub name: String,
    pub key_prefix: String,
    pub status: ApiKeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimitConfig>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyResponse {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id().to_string(),
            subscription_id: key.subscription_id().to_string(),
            name: key.name().to_string(),
            key_prefix: key.key_prefix().to_string(),
            status: key.status(),
            rate_limits: key.rate_limits().copied(),
            last_used_at: key.last_used_at(),
            expires_at: key.expires_at(),
            revoked_at: key.revoked_at(),
            created_at: key.created_at(),
            updated_at: key.updated_at(),
        }
    }
}

/// Key response with its secret; only returned at issue and regeneration
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyWithSecretResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
    pub secret: String,
}

impl From<IssuedApiKey> for ApiKeyWithSecretResponse {
    fn from(issued: IssuedApiKey) -> Self {
        Self {
            api_key: ApiKeyResponse::from(&issued.api_key),
            secret: issued.secret,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListApiKeysResponse {
    pub api_keys: Vec<ApiKeyResponse>,
    pub total: usize,
}

fn parse_key_id(raw: &str) -> Result<ApiKeyId, ApiError> {
    ApiKeyId::new(raw).map_err(|e| ApiError::bad_request(e.to_string()).with_code("invalid_id"))
}

/// POST /admin/subscriptions/{subscription_id}/keys
pub async fn create_api_key(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<Json<ApiKeyWithSecretResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    debug!(subscription_id = %subscription_id, name = %request.name, "Admin issuing API key");

    let mut issue = IssueApiKeyRequest::new(subscription_id, request.name);
    issue.rate_limits = request.rate_limits;
    issue.expires_at = request.expires_at;

    let issued = state.api_keys.issue(issue).await?;
    Ok(Json(issued.into()))
}

/// GET /admin/subscriptions/{subscription_id}/keys
pub async fn list_api_keys(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(subscription_id): Path<String>,
) -> Result<Json<ListApiKeysResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;

    let api_keys: Vec<ApiKeyResponse> = state
        .api_keys
        .list_by_subscription(&subscription_id)
        .await?
        .iter()
        .map(ApiKeyResponse::from)
        .collect();

    Ok(Json(ListApiKeysResponse {
        total: api_keys.len(),
        api_keys,
    }))
}

/// GET /admin/keys/{key_id}
pub async fn get_api_key(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(key_id): Path<String>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let id = parse_key_id(&key_id)?;

    let key = state
        .api_keys
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("API key '{}' not found", id)))?;

    Ok(Json(ApiKeyResponse::from(&key)))
}

/// PUT /admin/keys/{key_id}
pub async fn rename_api_key(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(key_id): Path<String>,
    Json(request): Json<RenameApiKeyRequest>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let id = parse_key_id(&key_id)?;
    let renamed = state.api_keys.rename(&id, &request.name).await?;
    Ok(Json(ApiKeyResponse::from(&renamed)))
}

/// POST /admin/keys/{key_id}/regenerate
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(key_id): Path<String>,
) -> Result<Json<ApiKeyWithSecretResponse>, ApiError> {
    let id = parse_key_id(&key_id)?;
    let issued = state.api_keys.regenerate(&id).await?;
    Ok(Json(issued.into()))
}

/// POST /admin/keys/{key_id}/revoke
pub async fn revoke_api_key(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(key_id): Path<String>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let id = parse_key_id(&key_id)?;
    let revoked = state.api_keys.revoke(&id).await?;
    Ok(Json(ApiKeyResponse::from(&revoked)))
}

/// PUT /admin/keys/{key_id}/rate-limits
pub async fn update_rate_limits(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(key_id): Path<String>,
    Json(request): Json<UpdateRateLimitsRequest>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let id = parse_key_id(&key_id)?;
    let updated = state
        .api_keys
        .update_rate_limits(&id, request.rate_limits)
        .await?;
    Ok(Json(ApiKeyResponse::from(&updated)))
}
