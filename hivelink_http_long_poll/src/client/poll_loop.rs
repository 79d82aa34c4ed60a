//! Background polling tasks feeding the subscription manager's channel.

use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use hivelink_core::{CommandId, DeviceId, DeviceScope, Event, Timestamp};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::LongPollClient;
use crate::error::ClientError;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF_MS: u64 = 1000;

/// What a stream poll loop is subscribed to.
#[derive(Debug, Clone)]
pub(super) enum PollTarget {
    Commands {
        scope: DeviceScope,
        names: BTreeSet<String>,
    },
    Notifications {
        device: DeviceId,
        names: BTreeSet<String>,
    },
}

impl PollTarget {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Commands { .. } => "commands",
            Self::Notifications { .. } => "notifications",
        }
    }
}

/// Run a stream poll loop until the subscription is closed or too many
/// consecutive polls fail.
///
/// The cursor starts at the server's now and advances to the newest
/// received event, so a poll that returns several events never re-delivers
/// them on the next round.
pub(super) async fn poll_loop(
    client: LongPollClient,
    target: PollTarget,
    sender: async_channel::Sender<Event>,
    closed: Arc<AtomicBool>,
    token: CancellationToken,
) {
    info!(kind = target.kind(), "starting poll loop");

    let mut cursor: Option<Timestamp> = None;
    let mut consecutive_errors = 0u32;

    loop {
        if closed.load(Ordering::SeqCst) {
            info!(kind = target.kind(), "poll loop closed, exiting");
            break;
        }

        let result = tokio::select! {
            () = token.cancelled() => {
                info!(kind = target.kind(), "poll loop cancelled, exiting");
                break;
            }
            result = poll_once(&client, &target, cursor) => result,
        };

        match result {
            Ok(events) => {
                consecutive_errors = 0;
                if !events.is_empty() {
                    debug!(kind = target.kind(), count = events.len(), "poll received events");
                }
                for event in events {
                    if event.timestamp > cursor.unwrap_or(Timestamp::from_millis(0)) {
                        cursor = Some(event.timestamp);
                    }
                    if sender.send(event).await.is_err() {
                        info!(kind = target.kind(), "event channel closed, exiting");
                        closed.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
            Err(ClientError::NotFound(message)) => {
                error!(kind = target.kind(), message, "subscription target gone, exiting");
                closed.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    kind = target.kind(),
                    error = %e,
                    consecutive_errors,
                    "poll error"
                );

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(kind = target.kind(), "too many consecutive poll errors, exiting");
                    closed.store(true, Ordering::SeqCst);
                    break;
                }

                tokio::time::sleep(Duration::from_millis(
                    ERROR_BACKOFF_MS * u64::from(consecutive_errors),
                ))
                .await;
            }
        }
    }
}

async fn poll_once(
    client: &LongPollClient,
    target: &PollTarget,
    cursor: Option<Timestamp>,
) -> Result<Vec<Event>, ClientError> {
    match target {
        PollTarget::Commands { scope, names } => client.poll_commands(scope, names, cursor).await,
        PollTarget::Notifications { device, names } => {
            client.poll_notifications(device, names, cursor).await
        }
    }
}

/// Run a single-command update wait until the update arrives or the
/// subscription is closed. Unlike stream loops this task finishes itself
/// once the update has been delivered.
pub(super) async fn update_poll_loop(
    client: LongPollClient,
    device: DeviceId,
    command: CommandId,
    sender: async_channel::Sender<Event>,
    closed: Arc<AtomicBool>,
    token: CancellationToken,
) {
    info!(%device, %command, "starting command update wait");

    let mut consecutive_errors = 0u32;

    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        let result = tokio::select! {
            () = token.cancelled() => break,
            result = client.poll_command_update(&device, command) => result,
        };

        match result {
            Ok(Some(event)) => {
                debug!(%device, %command, "command update received");
                if sender.send(event).await.is_err() {
                    warn!(%device, %command, "event channel closed before update delivery");
                }
                break;
            }
            Ok(None) => {
                // Wait elapsed without an update; poll again.
                consecutive_errors = 0;
            }
            Err(ClientError::NotFound(message)) => {
                error!(%device, %command, message, "command gone, exiting");
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(%device, %command, error = %e, consecutive_errors, "update poll error");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(%device, %command, "too many consecutive poll errors, exiting");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(
                    ERROR_BACKOFF_MS * u64::from(consecutive_errors),
                ))
                .await;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
}
