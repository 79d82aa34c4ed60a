//! The long-poll server command.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hivelink_core::{
    memory::{MemoryDeviceDirectory, MemoryEventStore},
    DEFAULT_WAIT_TIMEOUT_SECS, MAX_WAIT_TIMEOUT_SECS,
};
use hivelink_http_long_poll::server::LongPollServerBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::metrics;

/// Arguments for the serve command.
#[derive(Debug, clap::Parser)]
pub(crate) struct ServeArgs {
    /// Socket address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub(crate) socket: String,

    /// Device ids to register at startup
    #[arg(long = "device", value_name = "ID")]
    pub(crate) devices: Vec<String>,

    /// Wait applied when a poll names no timeout (seconds)
    #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub(crate) default_wait: u64,

    /// Ceiling requested waits are clamped to (seconds)
    #[arg(long, default_value_t = MAX_WAIT_TIMEOUT_SECS)]
    pub(crate) max_wait: u64,

    /// Enable the Prometheus metrics server
    #[arg(long, default_value_t = false)]
    pub(crate) metrics: bool,

    /// Metrics server port (Prometheus endpoint)
    #[arg(long, default_value = "9090")]
    pub(crate) metrics_port: u16,

    /// Interval in seconds for sampling engine gauges
    #[arg(long, default_value_t = DEFAULT_METRICS_REFRESH_SECS)]
    pub(crate) metrics_refresh_interval: u64,
}

/// Default interval for sampling engine gauges.
const DEFAULT_METRICS_REFRESH_SECS: u64 = 15;

/// Run the long-poll server.
pub(crate) async fn run(args: ServeArgs, token: CancellationToken) -> Result<()> {
    let addr: SocketAddr = args.socket.parse()?;

    let store = Arc::new(MemoryEventStore::new());
    let directory = Arc::new(MemoryDeviceDirectory::new());
    for device in &args.devices {
        directory.add(device.clone().into()).await;
    }
    tracing::info!(devices = args.devices.len(), "registered devices");

    let state = LongPollServerBuilder::new(store, directory)
        .default_wait(Duration::from_secs(args.default_wait))
        .max_wait(Duration::from_secs(args.max_wait))
        .build();

    if args.metrics {
        let handle = metrics::init_metrics();
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], args.metrics_port).into();
        metrics::start_metrics_server(metrics_addr, handle).await?;

        let sampled = Arc::clone(&state);
        let metrics_token = token.clone();
        let interval = Duration::from_secs(args.metrics_refresh_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        metrics::record::set_polls_pending(sampled.dispatcher().pending().await);
                    }
                    () = metrics_token.cancelled() => {
                        tracing::debug!("Stopping metrics sampling task");
                        break;
                    }
                }
            }
        });
    }

    let app = hivelink_http_long_poll::server::router(Arc::clone(&state));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Long-poll server listening on {}", addr);

    // Graceful shutdown waits for in-flight connections, and a suspended
    // poll holds its connection for up to the full wait. Cancel pending
    // slots as soon as the token fires so those connections resolve and
    // the drain completes promptly.
    let draining = Arc::clone(&state);
    let drain_token = token.clone();
    tokio::spawn(async move {
        drain_token.cancelled().await;
        draining.shutdown().await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
