//! Configuration Tests
//!
//! Loading, saving and validating `driver.toml`.
//!
//! Run with: `cargo test -p driver --test config_tests`

use driver::{DriverConfig, DriverSettings};
use protocol::STD_CHANNEL;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("driver.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("driver.toml");

    let mut config = DriverConfig::default();
    config.driver.log_level = "debug".to_string();
    config.timeouts.bulk_write_ms = 2500;
    config.channel.key = Some("000102030405060708090A0B0C0D0E0F".to_string());
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[timeouts]
control_ms = 250

[buffers]
chunk_size = 4096
"#,
    );

    let config = DriverConfig::load(Some(path)).unwrap();
    let settings = config.driver_settings().unwrap();

    assert_eq!(settings.timeouts.control, Duration::from_millis(250));
    assert_eq!(settings.timeouts.channel_select, Duration::from_secs(5));
    assert_eq!(settings.chunk_size, 4096);
    assert_eq!(
        settings.staging_capacity,
        DriverSettings::DEFAULT_STAGING_CAPACITY
    );
    assert_eq!(settings.channel_key, None);
    assert_eq!(config.event_poll(), Duration::from_millis(100));
}

#[test]
fn test_channel_key_resolves_to_bytes() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[channel]
key = "57cddca71c885e1560fec697163d47f2"
"#,
    );

    let settings = DriverConfig::load(Some(path))
        .unwrap()
        .driver_settings()
        .unwrap();
    assert_eq!(settings.channel_key, Some(STD_CHANNEL.to_vec()));
}

#[test]
fn test_rejects_invalid_values() {
    let cases = [
        "[driver]\nlog_level = \"verbose\"\n",
        "[timeouts]\nchannel_select_ms = 0\n",
        "[buffers]\nchunk_size = 0\n",
        "[buffers]\nstaging_capacity = 1024\nchunk_size = 2048\n",
        "[channel]\nkey = \"1234\"\n",
        "[usb]\nevent_poll_ms = 0\n",
    ];

    for content in cases {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, content);
        assert!(
            DriverConfig::load(Some(path)).is_err(),
            "accepted invalid config: {}",
            content
        );
    }
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(DriverConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[timeouts\ncontrol_ms = ");
    assert!(DriverConfig::load(Some(path)).is_err());
}
