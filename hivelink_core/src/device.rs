//! Device identity, scopes, and principals.

use std::collections::BTreeSet;

/// A device identifier (an opaque GUID string on the wire).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A command identifier, unique per backend instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct CommandId(i64);

impl CommandId {
    /// Create a command id from its raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for CommandId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of devices a query or subscription is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceScope {
    /// Not restricted to specific devices. Still bounded by the principal's
    /// visible set when queries run.
    AllDevices,

    /// An explicit set of devices.
    Devices(BTreeSet<DeviceId>),
}

impl DeviceScope {
    /// Build a scope from an iterator of device ids.
    pub fn devices<I, D>(ids: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        Self::Devices(ids.into_iter().map(Into::into).collect())
    }

    /// Scope containing a single device.
    pub fn single(id: impl Into<DeviceId>) -> Self {
        let mut set = BTreeSet::new();
        set.insert(id.into());
        Self::Devices(set)
    }

    /// Whether the scope admits the given device.
    #[must_use]
    pub fn contains(&self, device: &DeviceId) -> bool {
        match self {
            Self::AllDevices => true,
            Self::Devices(set) => set.contains(device),
        }
    }
}

/// An opaque principal attached to a long-poll request.
///
/// The core never computes permissions: the access-control collaborator has
/// already reduced the principal to the set of devices it may observe, and
/// every store query is intersected with that set.
#[derive(Debug, Clone)]
pub struct Principal {
    visible: DeviceScope,
}

impl Principal {
    /// A principal restricted to the given visible device set.
    #[must_use]
    pub const fn new(visible: DeviceScope) -> Self {
        Self { visible }
    }

    /// A principal that may observe every device.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            visible: DeviceScope::AllDevices,
        }
    }

    /// The devices this principal may observe.
    #[must_use]
    pub const fn visible(&self) -> &DeviceScope {
        &self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_devices_scope_contains_everything() {
        let scope = DeviceScope::AllDevices;
        assert!(scope.contains(&DeviceId::new("dev1")));
        assert!(scope.contains(&DeviceId::new("anything")));
    }

    #[test]
    fn explicit_scope_contains_only_members() {
        let scope = DeviceScope::devices(["dev1", "dev2"]);
        assert!(scope.contains(&DeviceId::new("dev1")));
        assert!(!scope.contains(&DeviceId::new("dev3")));
    }

    #[test]
    fn single_scope_holds_one_device() {
        let scope = DeviceScope::single("dev1");
        assert!(scope.contains(&DeviceId::new("dev1")));
        assert!(!scope.contains(&DeviceId::new("dev2")));
    }

    #[test]
    fn device_id_converts_from_owned_and_borrowed_strings() {
        let owned: DeviceId = String::from("dev1").into();
        let borrowed: DeviceId = "dev1".into();
        assert_eq!(owned, borrowed);
        assert!(DeviceScope::single(String::from("dev1")).contains(&owned));
    }
}
