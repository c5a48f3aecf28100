//! Configuration Integration Tests
//!
//! Loading, saving and validating `config.toml` files on disk.
//!
//! Run with: `cargo test -p daemon --test config_tests`

use daemon::EnablerConfig;
use protocol::DeviceMatchFilter;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = EnablerConfig::default();
    config.general.log_level = Some("debug".to_string());
    config.timing.open_attempts = 5;
    config.save(&path).unwrap();

    let loaded = EnablerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_partial_file_gets_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[timing]
attach_settle_ms = 2500
"#,
    )
    .unwrap();

    let config = EnablerConfig::load(Some(path)).unwrap();
    assert_eq!(config.timing.attach_settle_ms, 2500);
    assert_eq!(config.timing.open_attempts, 20);
    assert_eq!(config.filter().unwrap(), DeviceMatchFilter::cm6206());
    assert_eq!(
        config.supervisor_settings().attach_delay,
        Duration::from_millis(2500)
    );
}

#[test]
fn test_empty_file_is_default() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "").unwrap();

    let config = EnablerConfig::load(Some(path)).unwrap();
    assert_eq!(config, EnablerConfig::default());
}

#[test]
fn test_custom_device_ids() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[device]
vendor_id = "0x0d8c"
product_id = "0x0103"
"#,
    )
    .unwrap();

    let config = EnablerConfig::load(Some(path)).unwrap();
    assert_eq!(config.filter().unwrap(), DeviceMatchFilter::new(0x0d8c, 0x0103));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = tempdir().unwrap();

    let bad_level = dir.path().join("level.toml");
    fs::write(&bad_level, "[general]\nlog_level = \"loud\"\n").unwrap();
    assert!(EnablerConfig::load(Some(bad_level)).is_err());

    let bad_id = dir.path().join("id.toml");
    fs::write(&bad_id, "[device]\nvendor_id = \"0d8c\"\n").unwrap();
    assert!(EnablerConfig::load(Some(bad_id)).is_err());

    let zero_attempts = dir.path().join("attempts.toml");
    fs::write(&zero_attempts, "[timing]\nopen_attempts = 0\n").unwrap();
    assert!(EnablerConfig::load(Some(zero_attempts)).is_err());
}

#[test]
fn test_malformed_toml_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[timing\nopen_attempts = ").unwrap();

    let error = EnablerConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", error).contains("Failed to parse config file"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = EnablerConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}
