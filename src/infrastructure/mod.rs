//! Infrastructure layer - stores, services and background workers

pub mod api_key;
pub mod logging;
pub mod metering;
pub mod observability;
pub mod quota;
pub mod rate_limit;
pub mod storage;
pub mod subscription;
