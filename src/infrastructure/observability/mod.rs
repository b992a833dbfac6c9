//! Observability infrastructure - Prometheus metrics

mod metrics;

pub use self::metrics::{
    create_metrics_router, init_metrics, record_http_request, record_rollover,
    record_store_failure, record_usage_event_failure, record_usage_events_published,
    record_verdict, MetricsConfig, PrometheusMetrics,
};
