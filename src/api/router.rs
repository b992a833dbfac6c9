use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{any, get},
    Extension, Router,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::admin;
use super::health;
use super::middleware::{metering_middleware, metrics_middleware};
use super::state::AppState;
use super::types::Json;
use crate::domain::metering::Verdict;

/// Put `routes` behind the metering middleware
///
/// Every request to these routes must present an API key and is admitted,
/// rate limited or quota-checked before the handler runs.
pub fn metered(routes: Router<AppState>, state: AppState) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(state, metering_middleware))
}

/// Forward-auth endpoint: an upstream proxy asks whether to serve a request
async fn admit(Extension(verdict): Extension<Verdict>) -> Json<Verdict> {
    Json(verdict)
}

/// Create the full router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    let v1 = metered(Router::new().route("/admit", any(admit)), state.clone());

    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        .nest("/v1", v1)
        .nest("/admin", admin::create_admin_router())
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
