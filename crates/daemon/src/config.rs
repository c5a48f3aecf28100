//! Enabler configuration management

use crate::supervisor::SupervisorSettings;
use crate::usb::SessionSettings;
use anyhow::{Context, Result, anyhow};
use protocol::{CM6206_PRODUCT_ID, CM6206_VENDOR_ID, DeviceMatchFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnablerConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Overrides the mode default (info one-shot, error in daemon mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Identity of the adapters to activate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB Vendor ID, e.g. "0x0d8c"
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// USB Product ID, e.g. "0x0102"
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        format!("{:#06x}", CM6206_VENDOR_ID)
    }

    fn default_product_id() -> String {
        format!("{:#06x}", CM6206_PRODUCT_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Device open attempts before a session is aborted
    #[serde(default = "TimingSettings::default_open_attempts")]
    pub open_attempts: u32,
    #[serde(default = "TimingSettings::default_one_second")]
    pub open_retry_interval_ms: u64,
    /// Delay between hot-plug arrival and activation
    #[serde(default = "TimingSettings::default_one_second")]
    pub attach_settle_ms: u64,
    /// Delay between wake-up and re-scan
    #[serde(default = "TimingSettings::default_one_second")]
    pub wake_settle_ms: u64,
    #[serde(default = "TimingSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            open_attempts: Self::default_open_attempts(),
            open_retry_interval_ms: Self::default_one_second(),
            attach_settle_ms: Self::default_one_second(),
            wake_settle_ms: Self::default_one_second(),
            transfer_timeout_ms: Self::default_transfer_timeout(),
        }
    }
}

impl TimingSettings {
    fn default_open_attempts() -> u32 {
        20
    }

    fn default_one_second() -> u64 {
        1000
    }

    fn default_transfer_timeout() -> u64 {
        5000
    }
}

impl EnablerConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order; finding
    /// none is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find().ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: EnablerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if none is usable
    pub fn load_or_default() -> Self {
        if Self::find().is_none() {
            return Self::default();
        }

        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// First existing file among the standard locations
    fn find() -> Option<PathBuf> {
        [Self::default_path(), Self::system_path()]
            .into_iter()
            .find(|p| p.exists())
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
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

    /// Get the default (per-user) configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("cm6206-enabler").join("config.toml")
        } else {
            PathBuf::from(".config/cm6206-enabler/config.toml")
        }
    }

    /// System-wide configuration file path
    pub fn system_path() -> PathBuf {
        PathBuf::from("/etc/cm6206-enabler/config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = &self.general.log_level {
            Self::validate_log_level(level)?;
        }

        Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?;
        Self::parse_hex_id(&self.device.product_id, "product_id")?;

        if self.timing.open_attempts == 0 {
            return Err(anyhow!("open_attempts must be at least 1"));
        }
        if self.timing.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be at least 1"));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&level) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }
        Ok(())
    }

    /// Parse a hex ID (VID or PID)
    fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
        let hex_part = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| {
                anyhow!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                    name,
                    id
                )
            })?;

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }

    /// Match filter for the configured identity
    pub fn filter(&self) -> Result<DeviceMatchFilter> {
        Ok(DeviceMatchFilter::new(
            Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?,
            Self::parse_hex_id(&self.device.product_id, "product_id")?,
        ))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            open_attempts: self.timing.open_attempts,
            open_retry_interval: Duration::from_millis(self.timing.open_retry_interval_ms),
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            session: self.session_settings(),
            attach_delay: Duration::from_millis(self.timing.attach_settle_ms),
            wake_delay: Duration::from_millis(self.timing.wake_settle_ms),
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.transfer_timeout_ms)
    }
}

/// Expand `~` and environment variables in a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EnablerConfig::default();
        assert_eq!(config.device.vendor_id, "0x0d8c");
        assert_eq!(config.device.product_id, "0x0102");
        assert_eq!(config.timing.open_attempts, 20);
        assert_eq!(config.timing.transfer_timeout_ms, 5000);
        assert!(config.general.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_filter_is_cm6206() {
        let filter = EnablerConfig::default().filter().unwrap();
        assert_eq!(filter, DeviceMatchFilter::cm6206());
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(EnablerConfig::parse_hex_id("0x0d8c", "VID").unwrap(), 0x0d8c);
        assert_eq!(EnablerConfig::parse_hex_id("0XABCD", "VID").unwrap(), 0xabcd);
        assert_eq!(EnablerConfig::parse_hex_id("0x1", "VID").unwrap(), 0x1);
        assert!(EnablerConfig::parse_hex_id("0d8c", "VID").is_err());
        assert!(EnablerConfig::parse_hex_id("0x", "VID").is_err());
        assert!(EnablerConfig::parse_hex_id("0x12345", "VID").is_err());
        assert!(EnablerConfig::parse_hex_id("0xGHIJ", "VID").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EnablerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: EnablerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = EnablerConfig::default();
        config.general.log_level = Some("invalid".to_string());
        assert!(config.validate().is_err());

        config.general.log_level = Some("debug".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = EnablerConfig::default();
        config.timing.open_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let mut config = EnablerConfig::default();
        config.timing.attach_settle_ms = 250;

        let settings = config.supervisor_settings();
        assert_eq!(settings.attach_delay, Duration::from_millis(250));
        assert_eq!(settings.wake_delay, Duration::from_secs(1));
        assert_eq!(settings.session, SessionSettings::default());
        assert_eq!(config.transfer_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/cm6206.toml");
        assert!(!expanded.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
        assert_eq!(expand_path("/etc/x.toml"), PathBuf::from("/etc/x.toml"));
    }
}
