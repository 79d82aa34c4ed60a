//! Timestamps.

use core::time::Duration;

/// A timestamp represented as non-leap milliseconds since the Unix epoch.
///
/// Long-poll cursors are millisecond-granular: a poll request carries the
/// timestamp of the last event the caller has seen, and the query contract
/// is strictly-greater-than.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the system time is before the Unix epoch.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn now() -> Self {
        let duration = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch");
        Self(u64::try_from(duration.as_millis()).expect("timestamp overflows u64"))
    }

    /// Get the raw milliseconds value.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Compute the absolute difference between two timestamps.
    #[must_use]
    pub const fn abs_diff(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_millis() {
        assert!(Timestamp::from_millis(1) < Timestamp::from_millis(2));
        assert_eq!(Timestamp::from_millis(5), Timestamp::from_millis(5));
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now().as_millis() > 0);
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(4_500);
        assert_eq!(a.abs_diff(b), Duration::from_millis(3_500));
        assert_eq!(b.abs_diff(a), Duration::from_millis(3_500));
    }
}
