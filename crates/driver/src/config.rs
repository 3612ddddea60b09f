//! Driver configuration management
//!
//! TOML file resolved from an explicit path, the per-user config directory,
//! or `/etc/dlo-driver/driver.toml`, in that order. Every field has a default
//! so partial files are accepted.

use crate::settings::{DriverSettings, Timeouts};
use anyhow::{Context, Result, anyhow};
use protocol::constants::STD_CHANNEL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub buffers: BufferSection,
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub usb: UsbSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverSection {
    #[serde(default = "DriverSection::default_log_level")]
    pub log_level: String,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl DriverSection {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Transfer timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutSection {
    #[serde(default = "TimeoutSection::default_control_ms")]
    pub control_ms: u64,
    #[serde(default = "TimeoutSection::default_channel_select_ms")]
    pub channel_select_ms: u64,
    #[serde(default = "TimeoutSection::default_bulk_write_ms")]
    pub bulk_write_ms: u64,
    #[serde(default = "TimeoutSection::default_identify_ms")]
    pub identify_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            control_ms: Self::default_control_ms(),
            channel_select_ms: Self::default_channel_select_ms(),
            bulk_write_ms: Self::default_bulk_write_ms(),
            identify_ms: Self::default_identify_ms(),
        }
    }
}

impl TimeoutSection {
    fn default_control_ms() -> u64 {
        Timeouts::DEFAULT_CONTROL_MS
    }

    fn default_channel_select_ms() -> u64 {
        Timeouts::DEFAULT_CHANNEL_SELECT_MS
    }

    fn default_bulk_write_ms() -> u64 {
        Timeouts::DEFAULT_BULK_WRITE_MS
    }

    fn default_identify_ms() -> u64 {
        Timeouts::DEFAULT_IDENTIFY_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferSection {
    /// Bytes reserved per opened adapter for staged commands
    #[serde(default = "BufferSection::default_staging_capacity")]
    pub staging_capacity: usize,
    /// Largest single bulk transfer
    #[serde(default = "BufferSection::default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            staging_capacity: Self::default_staging_capacity(),
            chunk_size: Self::default_chunk_size(),
        }
    }
}

impl BufferSection {
    fn default_staging_capacity() -> usize {
        DriverSettings::DEFAULT_STAGING_CAPACITY
    }

    fn default_chunk_size() -> usize {
        DriverSettings::DEFAULT_CHUNK_SIZE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSection {
    /// Custom authorization payload as 32 hex digits; the standard channel
    /// is selected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbSection {
    /// Worker event-loop tick
    #[serde(default = "UsbSection::default_event_poll_ms")]
    pub event_poll_ms: u64,
}

impl Default for UsbSection {
    fn default() -> Self {
        Self {
            event_poll_ms: Self::default_event_poll_ms(),
        }
    }
}

impl UsbSection {
    fn default_event_poll_ms() -> u64 {
        100
    }
}

impl DriverConfig {
    /// Load configuration from the specified path, or the first standard
    /// location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/dlo-driver/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("dlo-driver").join("driver.toml")
        } else {
            PathBuf::from(".config/dlo-driver/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("control_ms", t.control_ms),
            ("channel_select_ms", t.channel_select_ms),
            ("bulk_write_ms", t.bulk_write_ms),
            ("identify_ms", t.identify_ms),
            ("event_poll_ms", self.usb.event_poll_ms),
        ] {
            if value == 0 {
                return Err(anyhow!("Timeout '{}' must be greater than zero", name));
            }
        }

        let b = &self.buffers;
        if b.staging_capacity == 0 {
            return Err(anyhow!("staging_capacity must be greater than zero"));
        }
        if b.chunk_size == 0 || b.chunk_size > b.staging_capacity {
            return Err(anyhow!(
                "Invalid chunk_size {}, must be between 1 and staging_capacity ({})",
                b.chunk_size,
                b.staging_capacity
            ));
        }

        if let Some(key) = &self.channel.key {
            Self::parse_channel_key(key)?;
        }

        Ok(())
    }

    /// Parse a 32-hex-digit channel key into its 16 payload bytes
    pub fn parse_channel_key(key: &str) -> Result<Vec<u8>> {
        let digits = key.trim();
        if digits.len() != STD_CHANNEL.len() * 2 || !digits.is_ascii() {
            return Err(anyhow!(
                "Invalid channel key '{}', expected {} hex digits",
                key,
                STD_CHANNEL.len() * 2
            ));
        }

        (0..digits.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&digits[i..i + 2], 16)
                    .map_err(|_| anyhow!("Invalid channel key '{}', not a valid hex number", key))
            })
            .collect()
    }

    /// Resolve into the settings the driver runs with
    pub fn driver_settings(&self) -> Result<DriverSettings> {
        let t = &self.timeouts;
        let channel_key = self
            .channel
            .key
            .as_deref()
            .map(Self::parse_channel_key)
            .transpose()?;

        Ok(DriverSettings {
            timeouts: Timeouts {
                control: Duration::from_millis(t.control_ms),
                channel_select: Duration::from_millis(t.channel_select_ms),
                bulk_write: Duration::from_millis(t.bulk_write_ms),
                identify: Duration::from_millis(t.identify_ms),
            },
            staging_capacity: self.buffers.staging_capacity,
            chunk_size: self.buffers.chunk_size,
            channel_key,
        })
    }

    pub fn event_poll(&self) -> Duration {
        Duration::from_millis(self.usb.event_poll_ms)
    }
}
