//! # Hivelink Core
//!
//! The long-poll publish/subscribe dispatch engine for the Hivelink
//! device-management backend.
//!
//! Devices post commands and notifications; clients observe new ones with
//! low latency without permanently held connections. This crate owns the
//! mechanism that makes that work on the server side:
//!
//! ```text
//! ┌──────────────┐   publish    ┌──────────────────────┐
//! │  Dispatcher   │ ───────────► │ SubscriptionRegistry │  (one per category:
//! └──────┬───────┘               │  key → ResultSlot    │   commands, updates,
//!        │                       └──────────┬───────────┘   notifications)
//!   event created                           │ resolve
//!   (after commit)                          ▼
//!                                ┌──────────────────────┐
//!                                │   WaitCoordinator    │  check → subscribe
//!                                │  (one per long-poll) │  → wait → re-check
//!                                └──────────────────────┘
//! ```
//!
//! An incoming long-poll request is handled by a [`waiter::WaitCoordinator`]:
//! it first queries the [`store::EventStore`] collaborator for events newer
//! than the caller's cursor, and only if nothing matches does it register
//! [`subscription::PendingSubscription`]s and suspend, for at most the
//! request's wait timeout, until a matching event is published or the
//! deadline fires. Either way it re-queries before responding, so the
//! published payload is only ever a wake-up trigger, never the authoritative
//! response body.
//!
//! HTTP routing, authentication decisions, and durable persistence are
//! external collaborators; see the [`store`] and [`directory`] traits.

pub mod device;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod memory;
pub mod registry;
pub mod slot;
pub mod store;
pub mod subscription;
pub mod timestamp;
pub mod waiter;

pub use device::{CommandId, DeviceId, DeviceScope, Principal};
pub use dispatch::Dispatcher;
pub use event::{Event, EventCategory};
pub use timestamp::Timestamp;
pub use waiter::WaitCoordinator;

/// Default wait timeout for a long-poll request (30 seconds).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;

/// Hard ceiling on the wait timeout a caller may request (60 seconds).
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 60;
