//! Metering middleware
//!
//! Runs every request through [`MeteringGateway::admit_secret`] and turns
//! the verdict into an HTTP outcome before the inner service sees it.
//!
//! [`MeteringGateway::admit_secret`]: crate::infrastructure::metering::MeteringGateway::admit_secret

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::metering::Verdict;

pub const QUOTA_REMAINING_HEADER: &str = "x-quota-remaining";
pub const USAGE_UNDERCOUNTED_HEADER: &str = "x-usage-undercounted";

/// Admit or reject the request; allowed requests carry their [`Verdict`]
/// as a request extension
pub async fn metering_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let secret = match extract_api_key_from_headers(request.headers()) {
        Ok(secret) => secret,
        Err(e) => return e.into_response(),
    };

    let verdict = match state.gateway.admit_secret(&secret).await {
        Ok(verdict) => verdict,
        Err(e) if e.is_unavailable() => {
            return ApiError::unavailable("Usage metering is temporarily unavailable")
                .with_code("metering_unavailable")
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Admission failed");
            return ApiError::from(e).into_response();
        }
    };

    match verdict {
        Verdict::Allow {
            remaining,
            under_counted,
            ..
        } => {
            request.extensions_mut().insert(verdict);
            let mut response = next.run(request).await;
            apply_allow_headers(response.headers_mut(), remaining, under_counted);
            response
        }
        denied => {
            debug!(verdict = denied.label(), "Request denied");
            deny_response(denied, state.quota_exceeded_status)
        }
    }
}

/// HTTP response for a denying verdict
pub fn deny_response(verdict: Verdict, quota_exceeded_status: StatusCode) -> Response {
    match verdict {
        Verdict::DenyRateLimited { retry_after } => {
            let seconds = retry_after.as_millis().div_ceil(1000).max(1);
            let mut response = ApiError::rate_limited("Rate limit exceeded").into_response();
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        Verdict::DenyQuotaExceeded { period_end } => ApiError::quota_exceeded(
            quota_exceeded_status,
            format!("Usage quota exhausted until {}", period_end.to_rfc3339()),
        )
        .into_response(),
        Verdict::DenyKeyInvalid => ApiError::unauthorized("Invalid, revoked or expired API key")
            .with_code("invalid_api_key")
            .into_response(),
        Verdict::Allow { .. } => StatusCode::OK.into_response(),
    }
}

fn apply_allow_headers(headers: &mut HeaderMap, remaining: Option<u64>, under_counted: bool) {
    if let Some(remaining) = remaining {
        headers.insert(QUOTA_REMAINING_HEADER, HeaderValue::from(remaining));
    }

    if under_counted {
        headers.insert(USAGE_UNDERCOUNTED_HEADER, HeaderValue::from_static("true"));
    }
}

/// Secret from `Authorization: Bearer <key>` or, failing that, `X-API-Key`
pub fn extract_api_key_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid Authorization header encoding"))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
    }

    if let Some(api_key_header) = headers.get("x-api-key") {
        let key = api_key_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid X-API-Key header encoding"))?
            .trim();

        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    Err(ApiError::unauthorized(
        "API key required. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header",
    )
    .with_code("missing_api_key"))
}
