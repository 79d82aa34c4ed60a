//! HTTP long-polling server implementation.
//!
//! Provides an Axum router over a [`hivelink_core::WaitCoordinator`].

mod handlers;
mod state;

pub use handlers::router;
pub use state::ServerState;

use std::sync::Arc;
use std::time::Duration;

use hivelink_core::{
    directory::DeviceDirectory,
    store::{EventSink, EventStore},
    DEFAULT_WAIT_TIMEOUT_SECS, MAX_WAIT_TIMEOUT_SECS,
};

/// Builder for the long-poll server state.
pub struct LongPollServerBuilder<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    default_wait: Duration,
    max_wait: Duration,
}

impl<S, D> core::fmt::Debug for LongPollServerBuilder<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LongPollServerBuilder")
            .field("default_wait", &self.default_wait)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl<S, D> LongPollServerBuilder<S, D>
where
    S: EventStore + EventSink,
    D: DeviceDirectory,
{
    /// Create a builder over the given store and directory.
    pub fn new(store: Arc<S>, directory: Arc<D>) -> Self {
        Self {
            store,
            directory,
            default_wait: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            max_wait: Duration::from_secs(MAX_WAIT_TIMEOUT_SECS),
        }
    }

    /// Set the wait applied when a poll request names no timeout.
    #[must_use]
    pub const fn default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Set the ceiling requested waits are clamped to.
    #[must_use]
    pub const fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Build the server state.
    #[must_use]
    pub fn build(self) -> Arc<ServerState<S, D>> {
        Arc::new(ServerState::new(
            self.store,
            self.directory,
            self.default_wait,
            self.max_wait,
        ))
    }

    /// Build and create the Axum router.
    pub fn into_router(self) -> axum::Router {
        router(self.build())
    }
}
