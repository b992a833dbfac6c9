//! API middleware components

pub mod admin_auth;
pub mod metering;
pub mod metrics;

pub use admin_auth::RequireAdmin;
pub use metering::{deny_response, extract_api_key_from_headers, metering_middleware};
pub use metrics::metrics_middleware;
