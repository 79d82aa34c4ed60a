//! Bounded pool of client-side subscription workers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_lock::Mutex;
use futures::future::join_all;
use hivelink_core::{CommandId, DeviceId, DeviceScope, Event, EventCategory};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    poll_loop::{poll_loop, update_poll_loop, PollTarget},
    LongPollClient,
};
use crate::{error::SubscribeError, SHUTDOWN_DRAIN_TIMEOUT_SECS, SUBSCRIPTION_POOL_SIZE};

/// Identity of a stream subscription, used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    category: EventCategory,
    /// `None` is the all-devices wildcard.
    devices: Option<BTreeSet<DeviceId>>,
    names: BTreeSet<String>,
}

impl StreamKey {
    fn new(category: EventCategory, scope: &DeviceScope, names: &BTreeSet<String>) -> Self {
        Self {
            category,
            devices: match scope {
                DeviceScope::AllDevices => None,
                DeviceScope::Devices(set) => Some(set.clone()),
            },
            names: names.clone(),
        }
    }
}

struct PollTask {
    handle: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl PollTask {
    fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Manages a bounded set of concurrent long-poll subscriptions and merges
/// their events onto one channel.
///
/// At most [`SUBSCRIPTION_POOL_SIZE`] poll tasks run at a time; a
/// subscription identical to a live one is deduplicated instead of
/// spawning a second task.
pub struct SubscriptionManager {
    client: LongPollClient,
    permits: Arc<Semaphore>,
    streams: Mutex<HashMap<StreamKey, PollTask>>,
    updates: Mutex<HashMap<(DeviceId, CommandId), PollTask>>,
    sender: async_channel::Sender<Event>,
    receiver: async_channel::Receiver<Event>,
    accepting: AtomicBool,
    token: CancellationToken,
}

impl SubscriptionManager {
    /// Create a manager over the given client.
    #[must_use]
    pub fn new(client: LongPollClient) -> Self {
        let (sender, receiver) = async_channel::bounded(128);
        Self {
            client,
            permits: Arc::new(Semaphore::new(SUBSCRIPTION_POOL_SIZE)),
            streams: Mutex::new(HashMap::new()),
            updates: Mutex::new(HashMap::new()),
            sender,
            receiver,
            accepting: AtomicBool::new(true),
            token: CancellationToken::new(),
        }
    }

    /// The merged event stream of every subscription.
    #[must_use]
    pub fn events(&self) -> async_channel::Receiver<Event> {
        self.receiver.clone()
    }

    /// Subscribe to the command stream of the given scope.
    ///
    /// # Errors
    ///
    /// Fails when the manager is shutting down or the pool is full.
    pub async fn subscribe_commands(
        &self,
        scope: DeviceScope,
        names: BTreeSet<String>,
    ) -> Result<(), SubscribeError> {
        let key = StreamKey::new(EventCategory::Command, &scope, &names);
        self.subscribe_stream(key, PollTarget::Commands { scope, names })
            .await
    }

    /// Subscribe to the notification stream of one device.
    ///
    /// # Errors
    ///
    /// Fails when the manager is shutting down or the pool is full.
    pub async fn subscribe_notifications(
        &self,
        device: DeviceId,
        names: BTreeSet<String>,
    ) -> Result<(), SubscribeError> {
        let scope = DeviceScope::single(device.clone());
        let key = StreamKey::new(EventCategory::Notification, &scope, &names);
        self.subscribe_stream(key, PollTarget::Notifications { device, names })
            .await
    }

    async fn subscribe_stream(
        &self,
        key: StreamKey,
        target: PollTarget,
    ) -> Result<(), SubscribeError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubscribeError::ShuttingDown);
        }

        let mut streams = self.streams.lock().await;
        if let Some(task) = streams.get(&key) {
            if task.handle.is_finished() {
                streams.remove(&key);
            } else {
                debug!(?key, "subscription already live, deduplicated");
                return Ok(());
            }
        }

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(SubscribeError::PoolExhausted);
        };

        let closed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn({
            let client = self.client.clone();
            let sender = self.sender.clone();
            let closed = Arc::clone(&closed);
            let token = self.token.clone();
            async move {
                poll_loop(client, target, sender, closed, token).await;
                drop(permit);
            }
        });
        streams.insert(key, PollTask { handle, closed });
        Ok(())
    }

    /// Cancel a command-stream subscription. Unknown keys are a no-op.
    pub async fn unsubscribe_commands(&self, scope: &DeviceScope, names: &BTreeSet<String>) {
        let key = StreamKey::new(EventCategory::Command, scope, names);
        if let Some(task) = self.streams.lock().await.remove(&key) {
            task.stop();
        }
    }

    /// Cancel a notification-stream subscription. Unknown keys are a no-op.
    pub async fn unsubscribe_notifications(&self, device: &DeviceId, names: &BTreeSet<String>) {
        let scope = DeviceScope::single(device.clone());
        let key = StreamKey::new(EventCategory::Notification, &scope, names);
        if let Some(task) = self.streams.lock().await.remove(&key) {
            task.stop();
        }
    }

    /// Wait for the update of one command; the task retires itself once
    /// the update has been delivered.
    ///
    /// # Errors
    ///
    /// Fails when the manager is shutting down or the pool is full.
    pub async fn subscribe_command_update(
        &self,
        device: DeviceId,
        command: CommandId,
    ) -> Result<(), SubscribeError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubscribeError::ShuttingDown);
        }

        let key = (device.clone(), command);
        let mut updates = self.updates.lock().await;
        if let Some(task) = updates.get(&key) {
            if task.handle.is_finished() {
                updates.remove(&key);
            } else {
                debug!(%device, %command, "update wait already live, deduplicated");
                return Ok(());
            }
        }

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(SubscribeError::PoolExhausted);
        };

        let closed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn({
            let client = self.client.clone();
            let sender = self.sender.clone();
            let closed = Arc::clone(&closed);
            let token = self.token.clone();
            async move {
                update_poll_loop(client, device, command, sender, closed, token).await;
                drop(permit);
            }
        });
        updates.insert(key, PollTask { handle, closed });
        Ok(())
    }

    /// Number of live subscription tasks, pruning any that have finished.
    pub async fn active_subscriptions(&self) -> usize {
        let mut streams = self.streams.lock().await;
        streams.retain(|_, task| !task.handle.is_finished());
        let mut updates = self.updates.lock().await;
        updates.retain(|_, task| !task.handle.is_finished());
        streams.len() + updates.len()
    }

    /// Graceful shutdown: stop accepting subscriptions, cancel every poll
    /// task, and wait up to [`SHUTDOWN_DRAIN_TIMEOUT_SECS`] for them to
    /// drain before aborting the stragglers.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.token.cancel();

        let mut tasks: Vec<PollTask> = Vec::new();
        tasks.extend(self.streams.lock().await.drain().map(|(_, task)| task));
        tasks.extend(self.updates.lock().await.drain().map(|(_, task)| task));
        for task in &tasks {
            task.closed.store(true, Ordering::SeqCst);
        }

        info!(count = tasks.len(), "draining subscription tasks");
        let abort_handles: Vec<_> = tasks.iter().map(|task| task.handle.abort_handle()).collect();
        let drained = tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS),
            join_all(tasks.into_iter().map(|task| task.handle)),
        )
        .await;
        if drained.is_err() {
            warn!("drain timeout elapsed, aborting remaining subscription tasks");
            for handle in abort_handles {
                handle.abort();
            }
        }

        self.sender.close();
        info!("subscription manager shut down");
    }
}

impl core::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
