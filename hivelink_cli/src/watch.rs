//! The watch command: subscribe to a server and print events.

use std::collections::BTreeSet;

use anyhow::Result;
use hivelink_core::{DeviceId, DeviceScope, EventCategory, DEFAULT_WAIT_TIMEOUT_SECS};
use hivelink_http_long_poll::client::{ClientOptions, LongPollClient, SubscriptionManager};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::metrics;

/// Arguments for the watch command.
#[derive(Debug, clap::Parser)]
pub(crate) struct WatchArgs {
    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080/")]
    pub(crate) url: String,

    /// Device ids to watch; empty watches commands on every device
    #[arg(long = "device", value_name = "ID")]
    pub(crate) devices: Vec<String>,

    /// Command or notification names to filter on
    #[arg(long = "name", value_name = "NAME")]
    pub(crate) names: Vec<String>,

    /// Watch the command stream
    #[arg(long, default_value_t = false)]
    pub(crate) commands: bool,

    /// Watch notification streams (needs at least one --device)
    #[arg(long, default_value_t = false)]
    pub(crate) notifications: bool,

    /// Server-side wait per poll (seconds)
    #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub(crate) wait: u64,
}

/// Run the watcher until cancelled.
pub(crate) async fn run(args: WatchArgs, token: CancellationToken) -> Result<()> {
    let base_url = Url::parse(&args.url)?;
    let client = LongPollClient::with_options(
        base_url,
        ClientOptions {
            wait_timeout_secs: args.wait,
        },
    )?;
    let manager = SubscriptionManager::new(client);

    let names: BTreeSet<String> = args.names.into_iter().collect();
    // Neither flag means both streams.
    let watch_commands = args.commands || !args.notifications;
    let watch_notifications = args.notifications;

    if watch_commands {
        let scope = if args.devices.is_empty() {
            DeviceScope::AllDevices
        } else {
            DeviceScope::devices(args.devices.iter().map(String::as_str))
        };
        manager.subscribe_commands(scope, names.clone()).await?;
    }
    if watch_notifications {
        if args.devices.is_empty() {
            tracing::warn!("notification streams are per device; pass --device");
        }
        for device in &args.devices {
            manager
                .subscribe_notifications(DeviceId::new(device.as_str()), names.clone())
                .await?;
        }
    }

    let events = manager.events();
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            event = events.recv() => {
                let Ok(event) = event else {
                    tracing::info!("event stream closed");
                    break;
                };
                metrics::record::event_received(category_label(event.category));
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

const fn category_label(category: EventCategory) -> &'static str {
    match category {
        EventCategory::Command => "command",
        EventCategory::CommandUpdate => "command-update",
        EventCategory::Notification => "notification",
    }
}
