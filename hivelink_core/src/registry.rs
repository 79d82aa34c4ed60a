//! Per-category subscription registries.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_lock::RwLock;

use crate::{
    event::Event,
    slot::ResultSlot,
    subscription::{PendingSubscription, SubscriptionFilter, SubscriptionHandle, SubscriptionId},
    timestamp::Timestamp,
};

struct RegistryInner<F> {
    entries: BTreeMap<SubscriptionId, RegisteredEntry<F>>,
    closed: bool,
}

struct RegisteredEntry<F> {
    filter: F,
    slot: Arc<ResultSlot>,
}

/// A concurrent map from subscription filter to pending result slots, one
/// instance per event category.
///
/// One write lock guards the whole map. `register` and `cancel` take it
/// only for their own mutation; `publish` holds it across the entire
/// scan-resolve-remove sequence, so a registration that completes
/// concurrently with a publish is either seen by that publish or ordered
/// strictly after it; a slot can never be read as pending by `publish` and
/// then independently cancelled through a stale reference.
pub struct SubscriptionRegistry<F> {
    inner: RwLock<RegistryInner<F>>,
}

impl<F: SubscriptionFilter> SubscriptionRegistry<F> {
    /// Create an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                entries: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    /// Register a new pending subscription under the given filter.
    ///
    /// After [`cancel_all`](Self::cancel_all) the registry is closed and
    /// this returns an already-cancelled subscription: the caller observes
    /// a closed receiver immediately instead of an error path.
    pub async fn register(&self, filter: F) -> PendingSubscription {
        let (slot, receiver) = ResultSlot::new();
        let slot = Arc::new(slot);
        let id = SubscriptionId::random();
        let handle = SubscriptionHandle {
            id,
            slot: Arc::clone(&slot),
        };

        let mut inner = self.inner.write().await;
        if inner.closed {
            drop(inner);
            slot.cancel();
            tracing::debug!(subscription = %id, "registry closed, subscription cancelled on entry");
        } else {
            inner.entries.insert(id, RegisteredEntry { filter, slot });
            tracing::trace!(subscription = %id, "subscription registered");
        }

        PendingSubscription {
            handle,
            receiver,
            created_at: Timestamp::now(),
        }
    }

    /// Cancel a subscription: remove the entry if still present and
    /// transition its slot to `Cancelled`. Idempotent; losing the race
    /// against a concurrent `publish` is a no-op.
    pub async fn cancel(&self, handle: &SubscriptionHandle) {
        let removed = self.inner.write().await.entries.remove(&handle.id);
        if removed.is_some() && handle.slot.cancel() {
            tracing::trace!(subscription = %handle.id, "subscription cancelled");
        }
    }

    /// Expire a subscription after its wait deadline: remove the entry and
    /// transition its slot to `TimedOut`. Idempotent, same race rules as
    /// [`cancel`](Self::cancel).
    pub async fn expire(&self, handle: &SubscriptionHandle) {
        let removed = self.inner.write().await.entries.remove(&handle.id);
        if removed.is_some() && handle.slot.mark_timed_out() {
            tracing::trace!(subscription = %handle.id, "subscription timed out");
        }
    }

    /// Resolve every registered subscription whose filter matches the
    /// event, removing each resolved entry. Returns the number resolved.
    ///
    /// Holds the write lock for the full scan so registration and publish
    /// are serialized relative to each other.
    pub async fn publish(&self, event: &Event) -> usize {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return 0;
        }

        let matching: Vec<SubscriptionId> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.filter.matches(event))
            .map(|(id, _)| *id)
            .collect();

        let mut resolved = 0;
        for id in matching {
            if let Some(entry) = inner.entries.remove(&id) {
                if entry.slot.resolve(event.clone()) {
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Shutdown path: mark the registry closed and cancel every pending
    /// subscription. Entries are resolved as `Cancelled`, never silently
    /// dropped. Returns the number cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        let entries = core::mem::take(&mut inner.entries);
        drop(inner);

        let mut cancelled = 0;
        for entry in entries.into_values() {
            if entry.slot.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "registry shut down with pending subscriptions");
        }
        cancelled
    }

    /// Number of currently pending subscriptions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the registry has no pending subscriptions.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

impl<F: SubscriptionFilter> Default for SubscriptionRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> core::fmt::Debug for SubscriptionRegistry<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        device::DeviceId,
        slot::SlotState,
        subscription::StreamFilter,
    };

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn notification(device: &str, name: &str) -> Event {
        Event::notification(DeviceId::new(device), name, serde_json::json!({}))
    }

    #[tokio::test]
    async fn publish_resolves_only_matching_slots() {
        let registry = SubscriptionRegistry::new();

        let matching = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        let other_device = registry
            .register(StreamFilter::device("dev2", BTreeSet::new()))
            .await;

        let resolved = registry.publish(&notification("dev1", "ping")).await;
        assert_eq!(resolved, 1);
        assert_eq!(matching.handle.slot().state(), SlotState::Resolved);
        assert_eq!(other_device.handle.slot().state(), SlotState::Pending);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn wildcard_and_specific_subscribers_both_resolve() {
        let registry = SubscriptionRegistry::new();

        let wildcard = registry
            .register(StreamFilter::all_devices(BTreeSet::new()))
            .await;
        let specific = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;

        assert_eq!(registry.publish(&notification("dev1", "ping")).await, 2);
        assert_eq!(wildcard.handle.slot().state(), SlotState::Resolved);
        assert_eq!(specific.handle.slot().state(), SlotState::Resolved);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn wildcard_resolves_alone_for_other_devices() {
        let registry = SubscriptionRegistry::new();

        let wildcard = registry
            .register(StreamFilter::all_devices(BTreeSet::new()))
            .await;
        let specific = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;

        assert_eq!(registry.publish(&notification("dev2", "ping")).await, 1);
        assert_eq!(wildcard.handle.slot().state(), SlotState::Resolved);
        assert_eq!(specific.handle.slot().state(), SlotState::Pending);
    }

    #[tokio::test]
    async fn name_filter_gates_resolution() {
        let registry = SubscriptionRegistry::new();

        let sub = registry
            .register(StreamFilter::device("dev1", names(&["temperature"])))
            .await;

        assert_eq!(registry.publish(&notification("dev1", "humidity")).await, 0);
        assert_eq!(sub.handle.slot().state(), SlotState::Pending);

        assert_eq!(
            registry.publish(&notification("dev1", "temperature")).await,
            1
        );
        assert_eq!(sub.handle.slot().state(), SlotState::Resolved);
    }

    #[tokio::test]
    async fn cancel_before_publish_never_resolves() {
        let registry = SubscriptionRegistry::new();

        let sub = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        registry.cancel(&sub.handle).await;

        assert_eq!(registry.publish(&notification("dev1", "ping")).await, 0);
        assert_eq!(sub.handle.slot().state(), SlotState::Cancelled);
        assert!(sub.receiver.await.is_err());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = SubscriptionRegistry::new();

        let sub = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        registry.cancel(&sub.handle).await;
        registry.cancel(&sub.handle).await;
        assert_eq!(sub.handle.slot().state(), SlotState::Cancelled);
    }

    #[tokio::test]
    async fn register_after_shutdown_returns_cancelled_subscription() {
        let registry: SubscriptionRegistry<StreamFilter> = SubscriptionRegistry::new();
        registry.cancel_all().await;

        let sub = registry
            .register(StreamFilter::device("dev1", BTreeSet::new()))
            .await;
        assert_eq!(sub.handle.slot().state(), SlotState::Cancelled);
        assert!(sub.receiver.await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_all_cancels_every_pending_entry() {
        let registry = SubscriptionRegistry::new();

        let subs: Vec<_> = {
            let mut out = Vec::new();
            for i in 0..10 {
                out.push(
                    registry
                        .register(StreamFilter::device(format!("dev{i}"), BTreeSet::new()))
                        .await,
                );
            }
            out
        };

        assert_eq!(registry.cancel_all().await, 10);
        for sub in subs {
            assert_eq!(sub.handle.slot().state(), SlotState::Cancelled);
        }
    }

    #[tokio::test]
    async fn racing_publish_and_cancel_settle_on_one_state() {
        for _ in 0..32 {
            let registry = Arc::new(SubscriptionRegistry::new());
            let sub = registry
                .register(StreamFilter::device("dev1", BTreeSet::new()))
                .await;

            let publisher = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.publish(&notification("dev1", "ping")).await })
            };
            let canceller = {
                let registry = Arc::clone(&registry);
                let handle = sub.handle.clone();
                tokio::spawn(async move { registry.cancel(&handle).await })
            };

            publisher.await.expect("join");
            canceller.await.expect("join");

            let state = sub.handle.slot().state();
            assert!(
                matches!(state, SlotState::Resolved | SlotState::Cancelled),
                "unexpected state {state:?}"
            );
            assert!(registry.is_empty().await);
        }
    }
}
