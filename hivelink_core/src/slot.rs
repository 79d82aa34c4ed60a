//! Single-assignment result slots.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::event::Event;

/// The observable state of a [`ResultSlot`].
///
/// `Pending` transitions to exactly one of the terminal states; the
/// transition is one-way and happens at most once regardless of which
/// caller (publisher, timeout timer, explicit cancel) wins the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Not yet resolved; a waiter may be suspended on it.
    Pending,

    /// A matching event was published; the payload went to the waiter.
    Resolved,

    /// Explicitly cancelled (unsubscribe or shutdown).
    Cancelled,

    /// The wait deadline fired before any matching event.
    TimedOut,
}

impl SlotState {
    /// Whether the slot can still be resolved.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct SlotInner {
    state: SlotState,
    // Present exactly while state is Pending.
    tx: Option<oneshot::Sender<Event>>,
}

/// A thread-safe container resolved at most once.
///
/// The publisher side calls [`resolve`](ResultSlot::resolve); the timeout
/// and cancellation paths call [`mark_timed_out`](ResultSlot::mark_timed_out)
/// and [`cancel`](ResultSlot::cancel). Whichever transition reaches the slot
/// first wins; the losing side's call is a no-op returning `false`.
///
/// The waiter observes resolution through the [`oneshot::Receiver`] handed
/// out at construction; cancellation and timeout surface there as a closed
/// channel.
pub struct ResultSlot {
    inner: Mutex<SlotInner>,
}

impl ResultSlot {
    /// Create a pending slot and the receiver its waiter suspends on.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<Event>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Pending,
                tx: Some(tx),
            }),
        };
        (slot, rx)
    }

    /// Resolve the slot with an event payload.
    ///
    /// Returns `true` if this call performed the `Pending → Resolved`
    /// transition, `false` if the slot was already terminal.
    pub fn resolve(&self, event: Event) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_pending() {
            return false;
        }
        inner.state = SlotState::Resolved;
        if let Some(tx) = inner.tx.take() {
            // The waiter may have dropped its receiver already (its own
            // deadline fired); the payload is only a trigger, so that loss
            // is harmless.
            let _ = tx.send(event);
        }
        true
    }

    /// Transition the slot to `Cancelled`. Idempotent.
    pub fn cancel(&self) -> bool {
        self.finish(SlotState::Cancelled)
    }

    /// Transition the slot to `TimedOut`. Idempotent.
    pub fn mark_timed_out(&self) -> bool {
        self.finish(SlotState::TimedOut)
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.lock().state
    }

    fn finish(&self, terminal: SlotState) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_pending() {
            return false;
        }
        inner.state = terminal;
        // Dropping the sender closes the waiter's receiver.
        inner.tx = None;
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for ResultSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResultSlot")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::DeviceId;

    fn event() -> Event {
        Event::notification(DeviceId::new("dev1"), "ping", serde_json::json!({}))
    }

    #[tokio::test]
    async fn resolve_delivers_payload() {
        let (slot, rx) = ResultSlot::new();
        assert!(slot.resolve(event()));
        assert_eq!(slot.state(), SlotState::Resolved);
        let received = rx.await.expect("payload");
        assert_eq!(received.name, "ping");
    }

    #[tokio::test]
    async fn cancel_closes_the_receiver() {
        let (slot, rx) = ResultSlot::new();
        assert!(slot.cancel());
        assert_eq!(slot.state(), SlotState::Cancelled);
        assert!(rx.await.is_err());
    }

    #[test]
    fn second_transition_loses() {
        let (slot, _rx) = ResultSlot::new();
        assert!(slot.resolve(event()));
        assert!(!slot.cancel());
        assert!(!slot.mark_timed_out());
        assert!(!slot.resolve(event()));
        assert_eq!(slot.state(), SlotState::Resolved);
    }

    #[tokio::test]
    async fn racing_transitions_produce_exactly_one_terminal_state() {
        for _ in 0..64 {
            let (slot, _rx) = ResultSlot::new();
            let slot = Arc::new(slot);

            let resolver = {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.resolve(event()) })
            };
            let canceller = {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.cancel() })
            };
            let expirer = {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.mark_timed_out() })
            };

            let wins = [
                resolver.await.expect("join"),
                canceller.await.expect("join"),
                expirer.await.expect("join"),
            ]
            .iter()
            .filter(|won| **won)
            .count();

            assert_eq!(wins, 1, "exactly one transition must win");
            assert!(!slot.state().is_pending());
        }
    }
}
