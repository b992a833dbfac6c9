use serde::Deserialize;

use crate::domain::metering::FailureMode;
use crate::domain::quota::QuotaPolicy;
use crate::domain::rate_limit::RateLimitConfig;
use crate::infrastructure::metering::{DispatcherConfig, GatewayConfig, SchedulerConfig};
use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::storage::StorageConfig;

/// Application configuration
///
/// Every section has defaults, so an empty environment boots an in-memory
/// instance on port 8080.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub metering: MeteringConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token guarding `/admin`; admin routes are disabled when unset
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Status code returned when a hard quota is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuotaExceededStatus {
    #[default]
    TooManyRequests,
    PaymentRequired,
}

impl QuotaExceededStatus {
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::TooManyRequests => 429,
            Self::PaymentRequired => 402,
        }
    }
}

/// Admission defaults and degraded-mode behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Bucket parameters for keys without their own override
    pub rate_limit: RateLimitConfig,
    /// Policy for subscriptions created without one
    pub default_policy: QuotaPolicy,
    pub quota_failure_mode: FailureMode,
    pub rate_limit_failure_mode: FailureMode,
    pub store_timeout_ms: u64,
    pub quota_exceeded_status: QuotaExceededStatus,
    pub events: DispatcherConfig,
}

impl MeteringConfig {
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            store_timeout_ms: self.store_timeout_ms,
            quota_failure_mode: self.quota_failure_mode,
            rate_limit_failure_mode: self.rate_limit_failure_mode,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            admin_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        let gateway = GatewayConfig::default();

        Self {
            rate_limit: RateLimitConfig::default(),
            default_policy: QuotaPolicy::default(),
            quota_failure_mode: gateway.quota_failure_mode,
            rate_limit_failure_mode: gateway.rate_limit_failure_mode,
            store_timeout_ms: gateway.store_timeout_ms,
            quota_exceeded_status: QuotaExceededStatus::default(),
            events: DispatcherConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quota::{OveragePolicy, PeriodLength};

    fn from_toml(source: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let config = from_toml("");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.metering.quota_failure_mode, FailureMode::FailClosed);
        assert_eq!(config.metering.rate_limit_failure_mode, FailureMode::FailOpen);
        assert_eq!(config.metering.quota_exceeded_status.as_u16(), 429);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_metering_section_overrides() {
        let config = from_toml(
            r#"
            [metering]
            quota_failure_mode = "fail_open"
            store_timeout_ms = 50
            quota_exceeded_status = "payment_required"

            [metering.rate_limit]
            capacity = 10
            refill_per_second = 0.5

            [metering.default_policy]
            request_limit = { limited = 5000 }
            period = { months = 1 }
            overage = "soft_allow"
            "#,
        );

        let metering = &config.metering;
        assert_eq!(metering.gateway().store_timeout_ms, 50);
        assert_eq!(metering.gateway().quota_failure_mode, FailureMode::FailOpen);
        assert_eq!(metering.quota_exceeded_status.as_u16(), 402);
        assert_eq!(metering.rate_limit.capacity, 10);
        assert!(metering.rate_limit.enabled);
        assert_eq!(metering.default_policy.request_limit().value(), Some(5000));
        assert_eq!(metering.default_policy.period(), PeriodLength::Months(1));
        assert_eq!(metering.default_policy.overage(), OveragePolicy::SoftAllow);
    }

    #[test]
    fn test_invalid_default_policy_is_rejected() {
        let result: Result<AppConfig, _> = config::Config::builder()
            .add_source(config::File::from_str(
                "[metering.default_policy]\nrequest_limit = { limited = 0 }\nperiod = { days = 30 }",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize();

        assert!(result.is_err());
    }
}
