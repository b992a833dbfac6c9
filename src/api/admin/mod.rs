//! Admin API endpoints for subscriptions, keys and usage

pub mod api_keys;
pub mod subscriptions;
pub mod usage;

use axum::{
    routing::{get, post, put},
    Router,
};

use super::state::AppState;

/// Create admin API router
pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        // Subscriptions
        .route(
            "/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/{subscription_id}",
            get(subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/{subscription_id}/suspend",
            post(subscriptions::suspend_subscription),
        )
        .route(
            "/subscriptions/{subscription_id}/resume",
            post(subscriptions::resume_subscription),
        )
        .route(
            "/subscriptions/{subscription_id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/{subscription_id}/policy",
            put(subscriptions::schedule_policy),
        )
        // Usage
        .route("/subscriptions/{subscription_id}/usage", get(usage::get_usage))
        .route(
            "/subscriptions/{subscription_id}/usage/history",
            get(usage::get_usage_history),
        )
        .route("/rollover", post(usage::trigger_rollover))
        // API keys
        .route(
            "/subscriptions/{subscription_id}/keys",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route(
            "/keys/{key_id}",
            get(api_keys::get_api_key).put(api_keys::rename_api_key),
        )
        .route("/keys/{key_id}/regenerate", post(api_keys::regenerate_api_key))
        .route("/keys/{key_id}/revoke", post(api_keys::revoke_api_key))
        .route("/keys/{key_id}/rate-limits", put(api_keys::update_rate_limits))
}
