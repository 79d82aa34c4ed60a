//! The dispatcher: event creation fanning out into the registries.

use crate::{
    event::{Event, EventCategory},
    registry::SubscriptionRegistry,
    subscription::{StreamFilter, UpdateFilter},
};

/// Owns the three per-category registries and routes published events into
/// the right one.
///
/// Constructed once by the hosting process and shared by `Arc`; there is no
/// ambient global. The event-creation path calls [`publish`](Self::publish)
/// exactly once per durably created event, after the store commit, so the
/// re-check query of a woken waiter is guaranteed to observe the event.
#[derive(Debug, Default)]
pub struct Dispatcher {
    commands: SubscriptionRegistry<StreamFilter>,
    command_updates: SubscriptionRegistry<UpdateFilter>,
    notifications: SubscriptionRegistry<StreamFilter>,
}

impl Dispatcher {
    /// Create a dispatcher with empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The command-stream registry.
    #[must_use]
    pub const fn commands(&self) -> &SubscriptionRegistry<StreamFilter> {
        &self.commands
    }

    /// The command-update registry.
    #[must_use]
    pub const fn command_updates(&self) -> &SubscriptionRegistry<UpdateFilter> {
        &self.command_updates
    }

    /// The notification-stream registry.
    #[must_use]
    pub const fn notifications(&self) -> &SubscriptionRegistry<StreamFilter> {
        &self.notifications
    }

    /// Publish an event into its category's registry, resolving every
    /// matching pending subscription. Returns the number resolved.
    pub async fn publish(&self, event: &Event) -> usize {
        let resolved = match event.category {
            EventCategory::Command => self.commands.publish(event).await,
            EventCategory::CommandUpdate => self.command_updates.publish(event).await,
            EventCategory::Notification => self.notifications.publish(event).await,
        };
        tracing::debug!(
            category = %event.category,
            device = %event.device_id,
            name = %event.name,
            resolved,
            "event published"
        );
        resolved
    }

    /// Tear down all registries: stop accepting registrations and resolve
    /// every pending slot as cancelled.
    pub async fn shutdown(&self) {
        let cancelled = self.commands.cancel_all().await
            + self.command_updates.cancel_all().await
            + self.notifications.cancel_all().await;
        tracing::info!(cancelled, "dispatcher shut down");
    }

    /// Total pending subscriptions across all categories.
    pub async fn pending(&self) -> usize {
        self.commands.len().await
            + self.command_updates.len().await
            + self.notifications.len().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        device::{CommandId, DeviceId},
        slot::SlotState,
        subscription::StreamFilter,
    };

    #[tokio::test]
    async fn publish_routes_by_category() {
        let dispatcher = Dispatcher::new();

        let command_sub = dispatcher
            .commands()
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        let notification_sub = dispatcher
            .notifications()
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;

        let event = Event::command(
            DeviceId::new("dev1"),
            CommandId::new(1),
            "reboot",
            serde_json::json!({}),
        );
        assert_eq!(dispatcher.publish(&event).await, 1);

        assert_eq!(command_sub.handle.slot().state(), SlotState::Resolved);
        assert_eq!(notification_sub.handle.slot().state(), SlotState::Pending);
    }

    #[tokio::test]
    async fn shutdown_cancels_across_categories() {
        let dispatcher = Dispatcher::new();

        dispatcher
            .commands()
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        dispatcher
            .notifications()
            .register(StreamFilter::all_devices(BTreeSet::new()))
            .await;
        assert_eq!(dispatcher.pending().await, 2);

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.pending().await, 0);
    }
}
