//! The long-poll wait coordinator.
//!
//! Ties the store, the device directory, and the dispatcher together into
//! the check-subscribe-wait-recheck sequence. The published event is only a
//! wakeup trigger: the response body always comes from a fresh store query,
//! so a wait that is woken, cancelled, or timed out all converge on the
//! same authoritative read.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;

use crate::{
    device::{CommandId, DeviceId, DeviceScope, Principal},
    directory::DeviceDirectory,
    dispatch::Dispatcher,
    error::WaitError,
    event::{Event, EventCategory},
    store::EventStore,
    subscription::{PendingSubscription, StreamFilter, SubscriptionHandle, UpdateFilter},
    timestamp::Timestamp,
};

/// Coordinates a single long-poll wait from first query to final response.
pub struct WaitCoordinator<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    dispatcher: Arc<Dispatcher>,
}

impl<S, D> Clone for WaitCoordinator<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            directory: Arc::clone(&self.directory),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, D> WaitCoordinator<S, D>
where
    S: EventStore,
    D: DeviceDirectory,
{
    /// Create a coordinator over the given collaborators.
    pub fn new(store: Arc<S>, directory: Arc<D>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            directory,
            dispatcher,
        }
    }

    /// The shared dispatcher events are published through.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Wait for command or notification events.
    ///
    /// Returns immediately with whatever the store already holds past
    /// `since` (defaulting to now); otherwise subscribes and suspends for
    /// up to `wait`, then re-queries. A zero `wait` skips the subscription
    /// entirely. Note the initial query and the subscription are not
    /// atomic: an event committed between them is picked up by the
    /// re-query only after the full wait elapses.
    pub async fn wait_for_events(
        &self,
        category: EventCategory,
        scope: DeviceScope,
        names: BTreeSet<String>,
        since: Option<Timestamp>,
        wait: Duration,
        principal: &Principal,
    ) -> Result<Vec<Event>, WaitError> {
        let since = since.unwrap_or_else(Timestamp::now);

        // Resolve explicit scopes up front: unknown devices are an error,
        // and a single invisible device is indistinguishable from an
        // unknown one. In a wider scope invisible devices are dropped.
        let resolved = match &scope {
            DeviceScope::AllDevices => None,
            DeviceScope::Devices(requested) => {
                if requested.len() == 1 {
                    if let Some(device) = requested.first() {
                        if !principal.visible().contains(device) {
                            return Err(WaitError::DeviceNotFound(device.clone()));
                        }
                    }
                }
                let devices = self
                    .directory
                    .resolve(&scope, principal.visible())
                    .await?;
                if devices.is_empty() {
                    return Ok(Vec::new());
                }
                Some(devices)
            }
        };

        let events = self
            .store
            .find_events(category, &scope, &names, since, principal.visible())
            .await?;
        if !events.is_empty() || wait.is_zero() {
            return Ok(events);
        }

        let registry = match category {
            EventCategory::Command => self.dispatcher.commands(),
            EventCategory::Notification => self.dispatcher.notifications(),
            // Command updates are awaited per command, never as a stream.
            EventCategory::CommandUpdate => return Ok(events),
        };

        let mut subscriptions: Vec<PendingSubscription> = Vec::new();
        match resolved {
            None => {
                subscriptions.push(registry.register(StreamFilter::all_devices(names.clone())).await);
            }
            Some(devices) => {
                for device in devices {
                    subscriptions
                        .push(registry.register(StreamFilter::device(device, names.clone())).await);
                }
            }
        }

        let handles: Vec<SubscriptionHandle> = subscriptions
            .iter()
            .map(|sub| sub.handle.clone())
            .collect();
        let receivers = subscriptions.into_iter().map(|sub| sub.receiver);

        tracing::debug!(
            %category,
            subscriptions = handles.len(),
            wait_ms = wait.as_millis() as u64,
            "suspending long poll"
        );

        let woken = matches!(
            tokio::time::timeout(wait, select_all(receivers)).await,
            Ok((Ok(_), _, _))
        );
        for handle in &handles {
            if woken {
                registry.cancel(handle).await;
            } else {
                registry.expire(handle).await;
            }
        }
        tracing::debug!(%category, woken, "long poll resumed");

        // The re-query is the response, whatever ended the wait.
        Ok(self
            .store
            .find_events(category, &scope, &names, since, principal.visible())
            .await?)
    }

    /// Wait for the update of a single command.
    ///
    /// Errors if the device is unknown (or invisible to the principal) or
    /// the command does not exist; returns `None` when the wait elapses
    /// without an update.
    pub async fn wait_for_command_update(
        &self,
        device: &DeviceId,
        command: CommandId,
        wait: Duration,
        principal: &Principal,
    ) -> Result<Option<Event>, WaitError> {
        // Invisible devices are indistinguishable from unknown ones.
        if !principal.visible().contains(device) {
            return Err(WaitError::DeviceNotFound(device.clone()));
        }
        if !self.directory.exists(device).await? {
            return Err(WaitError::DeviceNotFound(device.clone()));
        }
        if self.store.find_command(device, command).await?.is_none() {
            return Err(WaitError::CommandNotFound {
                device: device.clone(),
                command,
            });
        }

        if let Some(update) = self.store.find_command_update(device, command).await? {
            return Ok(Some(update));
        }
        if wait.is_zero() {
            return Ok(None);
        }

        let registry = self.dispatcher.command_updates();
        let subscription = registry
            .register(UpdateFilter {
                device_id: device.clone(),
                command_id: command,
            })
            .await;

        tracing::debug!(
            device = %device,
            command = %command,
            wait_ms = wait.as_millis() as u64,
            "suspending command update poll"
        );

        let woken = matches!(
            tokio::time::timeout(wait, subscription.receiver).await,
            Ok(Ok(_))
        );
        if woken {
            registry.cancel(&subscription.handle).await;
        } else {
            registry.expire(&subscription.handle).await;
        }

        Ok(self.store.find_command_update(device, command).await?)
    }
}
