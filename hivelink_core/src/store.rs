//! The persistence/query collaborator interface.
//!
//! The engine never owns durable storage. It consumes a read-side
//! [`EventStore`] for the check and re-check queries of the long-poll
//! protocol, and the hosting process drives a write-side [`EventSink`]
//! whose contract is: commit first, then hand the stored event to the
//! [`Dispatcher`](crate::Dispatcher) exactly once. Publishing before the
//! commit is visible would let a woken waiter re-query and find nothing;
//! never fatal, the caller treats that like a timeout, but it wastes the
//! wake-up.

use std::collections::BTreeSet;

use futures::future::BoxFuture;

use crate::{
    device::{CommandId, DeviceId, DeviceScope},
    event::{Event, EventCategory},
    timestamp::Timestamp,
};

/// Problem inside the store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced device is unknown.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The referenced command is unknown.
    #[error("command {0} not found")]
    CommandNotFound(CommandId),

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Read-side queries over recorded events.
pub trait EventStore: Send + Sync + 'static {
    /// Events in `category` matching `scope` and `names` with timestamp
    /// strictly greater than `since`, restricted to the `visible` device
    /// set. Empty `names` matches all names.
    fn find_events<'a>(
        &'a self,
        category: EventCategory,
        scope: &'a DeviceScope,
        names: &'a BTreeSet<String>,
        since: Timestamp,
        visible: &'a DeviceScope,
    ) -> BoxFuture<'a, Result<Vec<Event>, StoreError>>;

    /// The command event for `(device, command)`, if the command exists.
    fn find_command<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
    ) -> BoxFuture<'a, Result<Option<Event>, StoreError>>;

    /// The update event for `(device, command)`, if the command's status
    /// has been set.
    fn find_command_update<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
    ) -> BoxFuture<'a, Result<Option<Event>, StoreError>>;
}

/// Write side of the event-creation path.
///
/// Each method records the event durably and returns the stored form; the
/// caller then publishes it through the dispatcher.
pub trait EventSink: Send + Sync + 'static {
    /// Record a new command for a device, assigning its id and timestamp.
    fn insert_command<'a>(
        &'a self,
        device: &'a DeviceId,
        name: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>>;

    /// Record a status/result update for an existing command.
    fn update_command<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>>;

    /// Record a new notification from a device.
    fn insert_notification<'a>(
        &'a self,
        device: &'a DeviceId,
        name: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>>;
}
