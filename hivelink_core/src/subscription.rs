//! Subscription keys, filters, and pending-subscription handles.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{
    device::{CommandId, DeviceId},
    event::Event,
    slot::ResultSlot,
    timestamp::Timestamp,
};

/// An opaque unique token identifying one registered subscription.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId([u8; 16]);

impl SubscriptionId {
    /// Create a new random subscription id.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }
}

impl core::fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SubscriptionId(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The device part of a stream subscription key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKey {
    /// Matches events from any device (within the principal's visible set
    /// at query time; publish-side matching is unrestricted).
    AllDevices,

    /// Matches events from one device.
    Device(DeviceId),
}

impl ScopeKey {
    fn admits(&self, device: &DeviceId) -> bool {
        match self {
            Self::AllDevices => true,
            Self::Device(id) => id == device,
        }
    }
}

/// Decides whether a published event resolves a registered subscription.
pub trait SubscriptionFilter: Clone + Send + Sync + 'static {
    /// Whether the event matches this subscription.
    fn matches(&self, event: &Event) -> bool;
}

/// Filter for command and notification streams: a device scope plus a name
/// allow-list (empty = match all names).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamFilter {
    /// The device part of the key.
    pub scope: ScopeKey,

    /// Names to match; empty matches every name.
    pub names: BTreeSet<String>,
}

impl StreamFilter {
    /// Filter for one device.
    pub fn device(id: impl Into<DeviceId>, names: BTreeSet<String>) -> Self {
        Self {
            scope: ScopeKey::Device(id.into()),
            names,
        }
    }

    /// Wildcard filter matching every device.
    #[must_use]
    pub const fn all_devices(names: BTreeSet<String>) -> Self {
        Self {
            scope: ScopeKey::AllDevices,
            names,
        }
    }
}

impl SubscriptionFilter for StreamFilter {
    fn matches(&self, event: &Event) -> bool {
        self.scope.admits(&event.device_id)
            && (self.names.is_empty() || self.names.contains(&event.name))
    }
}

/// Filter for the single-command wait: one `(device, command)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateFilter {
    /// The device the command was sent to.
    pub device_id: DeviceId,

    /// The command whose outcome is awaited.
    pub command_id: CommandId,
}

impl SubscriptionFilter for UpdateFilter {
    fn matches(&self, event: &Event) -> bool {
        event.device_id == self.device_id && event.command_id == Some(self.command_id)
    }
}

/// The registry-side handle to a registered subscription.
///
/// Used to cancel or expire the entry; carries no receiver, so the registry
/// and the waiter can hold their halves independently.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) slot: Arc<ResultSlot>,
}

impl SubscriptionHandle {
    /// The opaque id of this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The underlying slot (exposed for state inspection in tests and
    /// shutdown accounting).
    #[must_use]
    pub fn slot(&self) -> &ResultSlot {
        &self.slot
    }
}

/// A freshly registered subscription: the cancel handle plus the receiver
/// the waiter suspends on.
#[derive(Debug)]
pub struct PendingSubscription {
    /// Handle for cancel/expire against the registry.
    pub handle: SubscriptionHandle,

    /// Resolves with the triggering event; closes on cancel or timeout.
    pub receiver: oneshot::Receiver<Event>,

    /// When the subscription was registered.
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn stream_filter_scope_rules() {
        let wildcard = StreamFilter::all_devices(BTreeSet::new());
        let specific = StreamFilter::device("dev1", BTreeSet::new());

        let on_dev1 = Event::notification(DeviceId::new("dev1"), "a", serde_json::json!({}));
        let on_dev2 = Event::notification(DeviceId::new("dev2"), "a", serde_json::json!({}));

        assert!(wildcard.matches(&on_dev1));
        assert!(wildcard.matches(&on_dev2));
        assert!(specific.matches(&on_dev1));
        assert!(!specific.matches(&on_dev2));
    }

    #[test]
    fn stream_filter_name_rules() {
        let filtered = StreamFilter::device("dev1", names(&["temperature"]));

        let temp = Event::notification(DeviceId::new("dev1"), "temperature", serde_json::json!({}));
        let humidity = Event::notification(DeviceId::new("dev1"), "humidity", serde_json::json!({}));

        assert!(filtered.matches(&temp));
        assert!(!filtered.matches(&humidity));
    }

    #[test]
    fn update_filter_requires_both_device_and_command() {
        let filter = UpdateFilter {
            device_id: DeviceId::new("dev1"),
            command_id: CommandId::new(9),
        };

        let matching = Event::command_update(
            DeviceId::new("dev1"),
            CommandId::new(9),
            "reboot",
            serde_json::json!({"status": "done"}),
        );
        let other_command = Event::command_update(
            DeviceId::new("dev1"),
            CommandId::new(10),
            "reboot",
            serde_json::json!({}),
        );
        let other_device = Event::command_update(
            DeviceId::new("dev2"),
            CommandId::new(9),
            "reboot",
            serde_json::json!({}),
        );

        assert!(filter.matches(&matching));
        assert!(!filter.matches(&other_command));
        assert!(!filter.matches(&other_device));
    }

    #[test]
    fn subscription_ids_are_distinct() {
        assert_ne!(SubscriptionId::random(), SubscriptionId::random());
    }
}
