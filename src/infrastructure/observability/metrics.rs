//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;

use crate::domain::metering::{FailureMode, Verdict};

/// Prometheus metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Metrics endpoint path
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Prometheus metrics handle for serving metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the global Prometheus recorder
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("api_metering_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!(path = %config.path, "Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Create the metrics router
pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

/// Record one admission decision
pub fn record_verdict(verdict: &Verdict, duration: Duration) {
    counter!("metering_verdicts_total", "verdict" => verdict.label()).increment(1);
    histogram!("metering_admit_duration_seconds").record(duration.as_secs_f64());
}

/// Record a check skipped or surfaced because its store was unreachable
pub fn record_store_failure(check: &'static str, mode: FailureMode) {
    if mode.is_open() {
        counter!("metering_fail_open_total", "check" => check).increment(1);
    } else {
        counter!("metering_fail_closed_total", "check" => check).increment(1);
    }
}

pub fn record_rollover(opened: bool) {
    let outcome = if opened { "opened" } else { "already_current" };
    counter!("metering_rollovers_total", "outcome" => outcome).increment(1);
}

pub fn record_usage_events_published(sink: &'static str, count: usize) {
    counter!("metering_usage_events_published_total", "sink" => sink).increment(count as u64);
}

pub fn record_usage_event_failure(sink: &'static str) {
    counter!("metering_usage_event_failures_total", "sink" => sink).increment(1);
}

/// Record an HTTP request metric
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());

    if status >= 500 {
        counter!("http_server_errors_total", &labels).increment(1);
    }
}

/// Collapse identifier segments so path labels stay low-cardinality
fn sanitize_path(path: &str) -> String {
    let sanitized = path
        .split('/')
        .map(|segment| if is_identifier(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/");

    sanitized.chars().take(50).collect()
}

fn is_identifier(segment: &str) -> bool {
    segment.starts_with("sub-")
        || segment.starts_with("key-")
        || (!segment.is_empty() && segment.chars().any(|c| c.is_ascii_digit()))
}
