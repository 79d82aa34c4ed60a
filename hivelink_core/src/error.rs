//! Error taxonomy for the wait path.

use crate::{
    device::{CommandId, DeviceId},
    directory::DirectoryError,
    store::StoreError,
};

/// Failure of a long-poll wait.
///
/// Lost races (publish vs. timeout, cancel after resolve) are swallowed as
/// no-ops inside the engine and never surface here; a wait fails only when
/// it cannot produce a coherent response.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The wait referenced an unknown device; no subscription was created.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The single-command wait referenced an unknown command; no
    /// subscription was created.
    #[error("command {command} not found for device {device}")]
    CommandNotFound {
        /// The device named in the request.
        device: DeviceId,
        /// The command id named in the request.
        command: CommandId,
    },

    /// The store collaborator failed during the check or re-check query.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The directory collaborator failed while resolving the scope.
    #[error("directory error: {0}")]
    Directory(DirectoryError),
}

impl From<DirectoryError> for WaitError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            other => Self::Directory(other),
        }
    }
}
