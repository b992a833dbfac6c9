//! Serve command - metering API plus background workers

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::create_router_with_state;
use crate::config::AppConfig;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::metering::UsageEventDispatcher;
use crate::infrastructure::observability::{create_metrics_router, init_metrics};
use crate::{build_app_state, default_event_sinks, Repositories};

/// Run the metering server until SIGINT or SIGTERM
pub async fn run() -> anyhow::Result<()> {
    let config = super::load_config()?;
    init_logging(&config.logging);

    let metrics = init_metrics(&config.metrics);
    let repositories = Repositories::connect(&config.storage).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (events, dispatcher) = UsageEventDispatcher::spawn(
        default_event_sinks(&repositories),
        config.metering.events.clone(),
        shutdown_rx.clone(),
    );

    let state = build_app_state(&config, &repositories, events);

    let scheduler = if config.scheduler.enabled {
        info!(
            interval_secs = config.scheduler.interval_secs,
            "Starting period reset scheduler"
        );
        Some(
            state
                .scheduler
                .clone()
                .spawn(config.scheduler.interval(), shutdown_rx),
        )
    } else {
        info!("Period reset scheduler disabled");
        None
    };

    let mut app = create_router_with_state(state);
    if let Some(metrics) = metrics {
        app = app.merge(create_metrics_router(metrics, &config.metrics.path));
    }

    let addr = build_socket_addr(&config)?;
    info!("Starting metering server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and its event publisher) is gone; flush what is queued
    let _ = shutdown_tx.send(true);

    if let Some(handle) = scheduler {
        join_worker("scheduler", handle).await;
    }
    join_worker("usage event dispatcher", dispatcher).await;

    info!("Metering server shutdown complete");

    Ok(())
}

async fn join_worker(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(worker = name, error = %e, "Background worker ended abnormally");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_socket_addr() {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9090;

        let addr = build_socket_addr(&config).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn test_build_socket_addr_rejects_hostname() {
        let mut config = AppConfig::default();
        config.server.host = "localhost".to_string();

        assert!(build_socket_addr(&config).is_err());
    }
}
