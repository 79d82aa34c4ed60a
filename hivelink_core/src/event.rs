//! The event model shared by both sides of the protocol.

use crate::{
    device::{CommandId, DeviceId},
    timestamp::Timestamp,
};

/// The three independent event streams the broker dispatches.
///
/// There is no cross-category ordering guarantee; each category has its own
/// subscription registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    /// A command sent to a device.
    Command,

    /// A status/result update for a previously created command.
    CommandUpdate,

    /// A notification posted by a device.
    Notification,
}

impl core::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::CommandUpdate => "command-update",
            Self::Notification => "notification",
        };
        f.write_str(s)
    }
}

/// A single command, command-update, or notification event.
///
/// Immutable once created. The creation path assigns the timestamp before
/// the event is committed to the store, so the dispatcher and the store
/// agree on the cursor position of every event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The stream this event belongs to.
    pub category: EventCategory,

    /// The device this event concerns.
    pub device_id: DeviceId,

    /// The command or notification name.
    pub name: String,

    /// Creation time, also the long-poll cursor position of this event.
    pub timestamp: Timestamp,

    /// Arbitrary JSON parameters or results.
    pub payload: serde_json::Value,

    /// Set for `Command` and `CommandUpdate` events, so a single-command
    /// wait can key on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
}

impl Event {
    /// Build a command event.
    pub fn command(
        device_id: DeviceId,
        command_id: CommandId,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            category: EventCategory::Command,
            device_id,
            name: name.into(),
            timestamp: Timestamp::now(),
            payload,
            command_id: Some(command_id),
        }
    }

    /// Build a command-update event.
    pub fn command_update(
        device_id: DeviceId,
        command_id: CommandId,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            category: EventCategory::CommandUpdate,
            device_id,
            name: name.into(),
            timestamp: Timestamp::now(),
            payload,
            command_id: Some(command_id),
        }
    }

    /// Build a notification event.
    pub fn notification(
        device_id: DeviceId,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            category: EventCategory::Notification,
            device_id,
            name: name.into(),
            timestamp: Timestamp::now(),
            payload,
            command_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_command_id() {
        let event = Event::notification(
            DeviceId::new("dev1"),
            "temperature",
            serde_json::json!({"value": 21.5}),
        );
        assert_eq!(event.category, EventCategory::Notification);
        assert!(event.command_id.is_none());
    }

    #[test]
    fn command_round_trips_through_json() {
        let event = Event::command(
            DeviceId::new("dev1"),
            CommandId::new(7),
            "reboot",
            serde_json::json!({}),
        );
        let json = serde_json::to_string(&event).expect("encode");
        let decoded: Event = serde_json::from_str(&json).expect("decode");
        assert_eq!(event, decoded);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let event = Event::command(
            DeviceId::new("dev1"),
            CommandId::new(7),
            "reboot",
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&event).expect("encode");
        assert!(json.get("deviceId").is_some());
        assert!(json.get("commandId").is_some());
    }
}
