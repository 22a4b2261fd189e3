use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
///
/// Sub-second precision is truncated, which is what the Graphite line protocol expects.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub const fn as_secs(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_from_system_truncates() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_999);
        assert_eq!(UnixTimestamp::from_system(time).as_secs(), 1_700_000_000);
    }

    #[test]
    fn test_before_epoch_is_zero() {
        let time = SystemTime::UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(UnixTimestamp::from_system(time), UnixTimestamp::from_secs(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(UnixTimestamp::from_secs(1615889449).to_string(), "1615889449");
    }

    #[test]
    fn test_serde() {
        let ts = UnixTimestamp::from_secs(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "42");
    }
}
