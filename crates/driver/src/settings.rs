//! Runtime settings consumed by the driver operations
//!
//! These are the resolved values; the TOML layer in [`crate::config`] produces
//! them after validation.

use protocol::STD_CHANNEL;
use std::time::Duration;

/// Per-record transfer timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Ordinary control requests (serial fetch, config fetch, EDID reads)
    pub control: Duration,
    /// Channel selection; long enough for device-side validation
    pub channel_select: Duration,
    /// Each bulk chunk
    pub bulk_write: Duration,
    /// The status query made during identification
    pub identify: Duration,
}

impl Timeouts {
    pub const DEFAULT_CONTROL_MS: u64 = 100;
    pub const DEFAULT_CHANNEL_SELECT_MS: u64 = 5000;
    pub const DEFAULT_BULK_WRITE_MS: u64 = 10000;
    pub const DEFAULT_IDENTIFY_MS: u64 = 1000;
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_millis(Self::DEFAULT_CONTROL_MS),
            channel_select: Duration::from_millis(Self::DEFAULT_CHANNEL_SELECT_MS),
            bulk_write: Duration::from_millis(Self::DEFAULT_BULK_WRITE_MS),
            identify: Duration::from_millis(Self::DEFAULT_IDENTIFY_MS),
        }
    }
}

/// Settings shared by every record the driver manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Timeouts given to newly created records
    pub timeouts: Timeouts,
    /// Capacity of each record's staging buffer
    pub staging_capacity: usize,
    /// Largest bulk transfer submitted at once
    pub chunk_size: usize,
    /// Custom channel authorization payload, `None` for the standard one
    pub channel_key: Option<Vec<u8>>,
}

impl DriverSettings {
    pub const DEFAULT_STAGING_CAPACITY: usize = 64 * 1024;
    pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

    /// Payload sent by channel selection on mount
    pub fn channel_payload(&self) -> &[u8] {
        self.channel_key.as_deref().unwrap_or(&STD_CHANNEL)
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            staging_capacity: Self::DEFAULT_STAGING_CAPACITY,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            channel_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.control, Duration::from_millis(100));
        assert_eq!(t.channel_select, Duration::from_secs(5));
        assert_eq!(t.bulk_write, Duration::from_secs(10));
        assert_eq!(t.identify, Duration::from_secs(1));
    }

    #[test]
    fn test_channel_payload_falls_back_to_standard() {
        let mut settings = DriverSettings::default();
        assert_eq!(settings.channel_payload(), &STD_CHANNEL);

        settings.channel_key = Some(vec![1, 2, 3]);
        assert_eq!(settings.channel_payload(), &[1, 2, 3]);
    }
}
