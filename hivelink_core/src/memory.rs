//! In-memory collaborator implementations.
//!
//! Back the tests and the demo binary; a production deployment plugs real
//! persistence and a real device registry in behind the same traits.

use std::collections::{BTreeSet, HashSet};

use async_lock::RwLock;
use futures::{future::BoxFuture, FutureExt};

use crate::{
    device::{CommandId, DeviceId, DeviceScope},
    directory::{DeviceDirectory, DirectoryError},
    event::{Event, EventCategory},
    store::{EventSink, EventStore, StoreError},
    timestamp::Timestamp,
};

struct StoreState {
    events: Vec<Event>,
    next_command_id: i64,
    // Timestamps are forced strictly monotonic so the strictly-greater-than
    // cursor contract never drops two events created in the same millisecond.
    last_timestamp: u64,
}

impl StoreState {
    fn stamp(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis();
        self.last_timestamp = now.max(self.last_timestamp + 1);
        Timestamp::from_millis(self.last_timestamp)
    }
}

/// An in-memory [`EventStore`] + [`EventSink`].
pub struct MemoryEventStore {
    state: RwLock<StoreState>,
}

impl MemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                events: Vec::new(),
                next_command_id: 1,
                last_timestamp: 0,
            }),
        }
    }

    /// Number of recorded events.
    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Whether no events have been recorded.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.events.is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    fn find_events<'a>(
        &'a self,
        category: EventCategory,
        scope: &'a DeviceScope,
        names: &'a BTreeSet<String>,
        since: Timestamp,
        visible: &'a DeviceScope,
    ) -> BoxFuture<'a, Result<Vec<Event>, StoreError>> {
        async move {
            let state = self.state.read().await;
            let mut matching: Vec<Event> = state
                .events
                .iter()
                .filter(|event| {
                    event.category == category
                        && event.timestamp > since
                        && scope.contains(&event.device_id)
                        && visible.contains(&event.device_id)
                        && (names.is_empty() || names.contains(&event.name))
                })
                .cloned()
                .collect();
            matching.sort_by_key(|event| event.timestamp);
            Ok(matching)
        }
        .boxed()
    }

    fn find_command<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
    ) -> BoxFuture<'a, Result<Option<Event>, StoreError>> {
        async move {
            let state = self.state.read().await;
            Ok(state
                .events
                .iter()
                .find(|event| {
                    event.category == EventCategory::Command
                        && event.device_id == *device
                        && event.command_id == Some(command)
                })
                .cloned())
        }
        .boxed()
    }

    fn find_command_update<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
    ) -> BoxFuture<'a, Result<Option<Event>, StoreError>> {
        async move {
            let state = self.state.read().await;
            Ok(state
                .events
                .iter()
                .rev()
                .find(|event| {
                    event.category == EventCategory::CommandUpdate
                        && event.device_id == *device
                        && event.command_id == Some(command)
                })
                .cloned())
        }
        .boxed()
    }
}

impl EventSink for MemoryEventStore {
    fn insert_command<'a>(
        &'a self,
        device: &'a DeviceId,
        name: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>> {
        async move {
            let mut state = self.state.write().await;
            let command_id = CommandId::new(state.next_command_id);
            state.next_command_id += 1;
            let mut event = Event::command(device.clone(), command_id, name, payload);
            event.timestamp = state.stamp();
            state.events.push(event.clone());
            Ok(event)
        }
        .boxed()
    }

    fn update_command<'a>(
        &'a self,
        device: &'a DeviceId,
        command: CommandId,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>> {
        async move {
            let mut state = self.state.write().await;
            let name = state
                .events
                .iter()
                .find(|event| {
                    event.category == EventCategory::Command
                        && event.device_id == *device
                        && event.command_id == Some(command)
                })
                .map(|event| event.name.clone())
                .ok_or(StoreError::CommandNotFound(command))?;

            let mut event = Event::command_update(device.clone(), command, name, payload);
            event.timestamp = state.stamp();
            state.events.push(event.clone());
            Ok(event)
        }
        .boxed()
    }

    fn insert_notification<'a>(
        &'a self,
        device: &'a DeviceId,
        name: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<Event, StoreError>> {
        async move {
            let mut state = self.state.write().await;
            let mut event = Event::notification(device.clone(), name, payload);
            event.timestamp = state.stamp();
            state.events.push(event.clone());
            Ok(event)
        }
        .boxed()
    }
}

/// An in-memory [`DeviceDirectory`].
#[derive(Default)]
pub struct MemoryDeviceDirectory {
    devices: RwLock<HashSet<DeviceId>>,
}

impl MemoryDeviceDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with the given devices.
    pub fn with_devices<I, D>(devices: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        Self {
            devices: RwLock::new(devices.into_iter().map(Into::into).collect()),
        }
    }

    /// Register a device.
    pub async fn add(&self, device: DeviceId) {
        self.devices.write().await.insert(device);
    }
}

impl DeviceDirectory for MemoryDeviceDirectory {
    fn exists<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<bool, DirectoryError>> {
        async move { Ok(self.devices.read().await.contains(device)) }.boxed()
    }

    fn resolve<'a>(
        &'a self,
        scope: &'a DeviceScope,
        visible: &'a DeviceScope,
    ) -> BoxFuture<'a, Result<Vec<DeviceId>, DirectoryError>> {
        async move {
            let devices = self.devices.read().await;
            match scope {
                DeviceScope::AllDevices => Ok(devices
                    .iter()
                    .filter(|id| visible.contains(id))
                    .cloned()
                    .collect()),
                DeviceScope::Devices(requested) => {
                    let mut resolved = Vec::with_capacity(requested.len());
                    for id in requested {
                        if !devices.contains(id) {
                            return Err(DirectoryError::DeviceNotFound(id.clone()));
                        }
                        if visible.contains(id) {
                            resolved.push(id.clone());
                        }
                    }
                    Ok(resolved)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_events_honors_cursor_and_names() {
        let store = MemoryEventStore::new();
        let dev = DeviceId::new("dev1");

        let first = store
            .insert_notification(&dev, "temperature", serde_json::json!({"v": 1}))
            .await
            .expect("insert");
        let second = store
            .insert_notification(&dev, "humidity", serde_json::json!({"v": 2}))
            .await
            .expect("insert");
        assert!(second.timestamp > first.timestamp);

        let all = store
            .find_events(
                EventCategory::Notification,
                &DeviceScope::AllDevices,
                &BTreeSet::new(),
                Timestamp::from_millis(0),
                &DeviceScope::AllDevices,
            )
            .await
            .expect("query");
        assert_eq!(all.len(), 2);

        let after_first = store
            .find_events(
                EventCategory::Notification,
                &DeviceScope::AllDevices,
                &BTreeSet::new(),
                first.timestamp,
                &DeviceScope::AllDevices,
            )
            .await
            .expect("query");
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].name, "humidity");

        let temp_only: BTreeSet<String> = ["temperature".to_string()].into();
        let filtered = store
            .find_events(
                EventCategory::Notification,
                &DeviceScope::AllDevices,
                &temp_only,
                Timestamp::from_millis(0),
                &DeviceScope::AllDevices,
            )
            .await
            .expect("query");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "temperature");
    }

    #[tokio::test]
    async fn find_events_respects_visible_set() {
        let store = MemoryEventStore::new();
        store
            .insert_notification(&DeviceId::new("dev1"), "a", serde_json::json!({}))
            .await
            .expect("insert");
        store
            .insert_notification(&DeviceId::new("dev2"), "a", serde_json::json!({}))
            .await
            .expect("insert");

        let visible = DeviceScope::single("dev2");
        let events = store
            .find_events(
                EventCategory::Notification,
                &DeviceScope::AllDevices,
                &BTreeSet::new(),
                Timestamp::from_millis(0),
                &visible,
            )
            .await
            .expect("query");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, DeviceId::new("dev2"));
    }

    #[tokio::test]
    async fn command_lifecycle_is_queryable() {
        let store = MemoryEventStore::new();
        let dev = DeviceId::new("dev1");

        let command = store
            .insert_command(&dev, "reboot", serde_json::json!({}))
            .await
            .expect("insert");
        let command_id = command.command_id.expect("command id");

        assert!(store
            .find_command(&dev, command_id)
            .await
            .expect("query")
            .is_some());
        assert!(store
            .find_command_update(&dev, command_id)
            .await
            .expect("query")
            .is_none());

        store
            .update_command(&dev, command_id, serde_json::json!({"status": "done"}))
            .await
            .expect("update");
        let update = store
            .find_command_update(&dev, command_id)
            .await
            .expect("query")
            .expect("update recorded");
        assert_eq!(update.category, EventCategory::CommandUpdate);
        assert_eq!(update.name, "reboot");
    }

    #[tokio::test]
    async fn updating_unknown_command_fails() {
        let store = MemoryEventStore::new();
        let result = store
            .update_command(
                &DeviceId::new("dev1"),
                CommandId::new(42),
                serde_json::json!({}),
            )
            .await;
        assert!(matches!(result, Err(StoreError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn directory_resolves_and_rejects() {
        let directory = MemoryDeviceDirectory::with_devices(["dev1", "dev2"]);

        assert!(directory
            .exists(&DeviceId::new("dev1"))
            .await
            .expect("exists"));
        assert!(!directory
            .exists(&DeviceId::new("ghost"))
            .await
            .expect("exists"));

        let resolved = directory
            .resolve(&DeviceScope::single("dev1"), &DeviceScope::AllDevices)
            .await
            .expect("resolve");
        assert_eq!(resolved, vec![DeviceId::new("dev1")]);

        let unknown = directory
            .resolve(&DeviceScope::single("ghost"), &DeviceScope::AllDevices)
            .await;
        assert!(matches!(
            unknown,
            Err(DirectoryError::DeviceNotFound(id)) if id == DeviceId::new("ghost")
        ));

        // Visible-set intersection drops, it does not error.
        let hidden = directory
            .resolve(&DeviceScope::single("dev2"), &DeviceScope::single("dev1"))
            .await
            .expect("resolve");
        assert!(hidden.is_empty());
    }
}
