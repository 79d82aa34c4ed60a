//! The device-directory collaborator interface.

use futures::future::BoxFuture;

use crate::device::{DeviceId, DeviceScope};

/// Problem inside the directory collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The referenced device is unknown.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The backend failed.
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Knows which devices exist and resolves wait scopes to concrete devices.
///
/// Access control stays outside the core: the `visible` argument is the
/// principal's already-permission-filtered device set, and resolution only
/// intersects, it never grants.
pub trait DeviceDirectory: Send + Sync + 'static {
    /// Whether the device is registered.
    fn exists<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<bool, DirectoryError>>;

    /// The concrete devices a wait on `scope` may subscribe on, restricted
    /// to `visible`. An explicit scope naming an unknown device is an
    /// error; `AllDevices` resolution is the caller's wildcard path and
    /// never reaches here.
    fn resolve<'a>(
        &'a self,
        scope: &'a DeviceScope,
        visible: &'a DeviceScope,
    ) -> BoxFuture<'a, Result<Vec<DeviceId>, DirectoryError>>;
}
