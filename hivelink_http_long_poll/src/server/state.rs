//! Server state: the wait coordinator plus the creation path.

use std::sync::Arc;
use std::time::Duration;

use hivelink_core::{
    directory::DeviceDirectory,
    store::{EventSink, EventStore, StoreError},
    CommandId, DeviceId, Dispatcher, Event, Principal, WaitCoordinator,
};

use crate::error::ApiError;

/// Shared state behind every handler.
///
/// The devices-exist and events-visible decisions live in the store and
/// directory collaborators; this layer owns the commit-then-publish
/// ordering of the creation path.
pub struct ServerState<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    dispatcher: Arc<Dispatcher>,
    waiter: WaitCoordinator<S, D>,
    default_wait: Duration,
    max_wait: Duration,
}

impl<S, D> ServerState<S, D>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    /// Create the state over the given collaborators.
    pub fn new(
        store: Arc<S>,
        directory: Arc<D>,
        default_wait: Duration,
        max_wait: Duration,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = WaitCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&dispatcher),
        );
        Self {
            store,
            directory,
            dispatcher,
            waiter,
            default_wait,
            max_wait,
        }
    }

    /// The wait coordinator serving the poll endpoints.
    #[must_use]
    pub const fn waiter(&self) -> &WaitCoordinator<S, D> {
        &self.waiter
    }

    /// The dispatcher events are published through.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Clamp a requested wait (in seconds) into `[0, max_wait]`, applying
    /// the default when the request named none.
    #[must_use]
    pub fn clamp_wait(&self, requested: Option<u64>) -> Duration {
        match requested {
            None => self.default_wait,
            Some(secs) => Duration::from_secs(secs).min(self.max_wait),
        }
    }

    /// Cancel every pending long poll. Used on graceful shutdown; waits
    /// resume and answer from their final re-query.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }

    async fn require_device(
        &self,
        device: &DeviceId,
        principal: &Principal,
    ) -> Result<(), ApiError> {
        // Invisible devices are indistinguishable from unknown ones.
        if !principal.visible().contains(device) || !self.directory.exists(device).await? {
            return Err(ApiError::DeviceNotFound(device.clone()));
        }
        Ok(())
    }

    /// Commit a new command, then publish it. The publish happens strictly
    /// after the store write so a woken waiter's re-query can see the
    /// event.
    pub async fn create_command(
        &self,
        device: &DeviceId,
        name: &str,
        payload: serde_json::Value,
        principal: &Principal,
    ) -> Result<Event, ApiError> {
        self.require_device(device, principal).await?;
        let event = self.store.insert_command(device, name, payload).await?;
        self.dispatcher.publish(&event).await;
        Ok(event)
    }

    /// Commit a command update, then publish it.
    pub async fn update_command(
        &self,
        device: &DeviceId,
        command: CommandId,
        payload: serde_json::Value,
        principal: &Principal,
    ) -> Result<Event, ApiError> {
        self.require_device(device, principal).await?;
        let event = self
            .store
            .update_command(device, command, payload)
            .await
            .map_err(|err| match err {
                StoreError::CommandNotFound(command) => ApiError::CommandNotFound {
                    device: device.clone(),
                    command,
                },
                other => other.into(),
            })?;
        self.dispatcher.publish(&event).await;
        Ok(event)
    }

    /// Commit a new notification, then publish it.
    pub async fn create_notification(
        &self,
        device: &DeviceId,
        name: &str,
        payload: serde_json::Value,
        principal: &Principal,
    ) -> Result<Event, ApiError> {
        self.require_device(device, principal).await?;
        let event = self.store.insert_notification(device, name, payload).await?;
        self.dispatcher.publish(&event).await;
        Ok(event)
    }
}

impl<S, D> core::fmt::Debug for ServerState<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerState")
            .field("default_wait", &self.default_wait)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}
