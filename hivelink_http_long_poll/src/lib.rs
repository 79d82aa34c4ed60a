//! # Hivelink HTTP Long Poll
//!
//! The HTTP surface of the Hivelink dispatch engine.
//!
//! This crate provides both sides of the long-poll protocol:
//!
//! - [`server`]: an [`axum`] router exposing the poll and creation
//!   endpoints over a [`hivelink_core::WaitCoordinator`]
//! - [`client`]: a [`reqwest`]-based client plus a bounded subscription
//!   manager that turns repeated polls into a continuous event stream

pub mod client;
pub mod error;
pub mod server;

/// Header carrying the comma-separated visible device set of the caller.
///
/// Absent means the principal is unrestricted. A real deployment derives
/// this from its authentication layer; the engine only consumes the result.
pub const VISIBLE_DEVICES_HEADER: &str = "X-Visible-Devices";

/// Grace added to a poll request's HTTP timeout on top of the wait, so the
/// server side of a full-length wait can still answer.
pub const REQUEST_TIMEOUT_GRACE_SECS: u64 = 5;

/// Size of the client-side subscription worker pool.
pub const SUBSCRIPTION_POOL_SIZE: usize = 100;

/// How long [`client::SubscriptionManager::shutdown`] waits for in-flight
/// polls to drain before aborting them.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 10;
