//! Prometheus metrics server for Hivelink.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Metric names used throughout the application.
pub mod names {
    /// Number of long polls currently suspended server-side.
    pub const POLLS_PENDING: &str = "hivelink_polls_pending";
    /// Total events received by a watcher, labeled by category.
    pub const EVENTS_RECEIVED_TOTAL: &str = "hivelink_events_received_total";
}

/// Initialize the metrics recorder and return a handle for the HTTP endpoint.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[must_use]
pub fn init_metrics() -> PrometheusHandle {
    #[allow(clippy::expect_used)]
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Start the metrics HTTP server on the given address.
///
/// This spawns a background task that serves the `/metrics` endpoint.
///
/// # Errors
///
/// Returns an error if the server fails to bind to the address.
pub async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> anyhow::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Convenience functions for recording metrics.
pub mod record {
    use metrics::{counter, gauge};

    use super::names;

    /// Set the number of suspended long polls.
    pub fn set_polls_pending(count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(names::POLLS_PENDING).set(count as f64);
    }

    /// Record an event received by a watcher.
    pub fn event_received(category: &'static str) {
        counter!(names::EVENTS_RECEIVED_TOTAL, "category" => category).increment(1);
    }
}
