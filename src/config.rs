//! Configuration for the dual heart-rate monitor.

use crate::air_quality::AirQualityConfig;
use crate::ble::link::LinkConfig;
use crate::ble::scanner::DEFAULT_NAME_FILTER;
use crate::core::sample::MonitorIdentity;
use crate::core::windowing::DEFAULT_WINDOW_SECS;
use crate::monitor::dual::SessionOptions;
use crate::monitor::export::ExportTimezone;
use crate::monitor::session::ExportSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tandem-hr";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Span of the live correlation windows
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// Delay before the automatic reconnect after link loss
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,

    /// Only sensors whose advertised name contains this are listed
    pub sensor_name_filter: String,

    /// Stream samples as soon as a sensor is connected
    pub subscribe_on_connect: bool,

    /// Directory for CSV exports
    pub export_path: PathBuf,

    /// Directory for the last-session store and statistics
    pub data_path: PathBuf,

    /// IANA timezone for exported timestamps; local time when unset
    pub timezone: Option<String>,

    /// Remembered sensors
    pub devices: PairedDevices,

    pub air_quality: AirQualityConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            window_duration: Duration::from_secs(DEFAULT_WINDOW_SECS),
            reconnect_delay: Duration::from_secs(1),
            sensor_name_filter: DEFAULT_NAME_FILTER.to_string(),
            subscribe_on_connect: true,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            timezone: None,
            devices: PairedDevices::default(),
            air_quality: AirQualityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.timezone()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(self.store_path())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Directory of the key-value store.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Export timezone from the configured name.
    pub fn timezone(&self) -> Result<ExportTimezone, ConfigError> {
        match self.timezone.as_deref() {
            None | Some("") => Ok(ExportTimezone::Local),
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map(ExportTimezone::Named)
                .map_err(|_| ConfigError::InvalidTimezone(name.to_string())),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            reconnect_delay: self.reconnect_delay,
            subscribe_on_connect: self.subscribe_on_connect,
        }
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        Ok(SessionOptions {
            window_secs: self.window_duration.as_secs().max(1),
            name_filter: self.sensor_name_filter.clone(),
            link: self.link_config(),
            export: ExportSettings {
                dir: self.export_path.clone(),
                timezone: self.timezone()?,
            },
        })
    }
}

/// Peripheral ids remembered by `pair`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevices {
    pub human: Option<String>,
    pub horse: Option<String>,
}

impl PairedDevices {
    pub fn get(&self, identity: MonitorIdentity) -> Option<&str> {
        match identity {
            MonitorIdentity::Human => self.human.as_deref(),
            MonitorIdentity::Horse => self.horse.as_deref(),
        }
    }

    pub fn set(&mut self, identity: MonitorIdentity, id: Option<String>) {
        match identity {
            MonitorIdentity::Human => self.human = id,
            MonitorIdentity::Horse => self.horse = id,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidTimezone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidTimezone(tz) => write!(f, "Unknown timezone: {tz}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, stored as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_duration, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.sensor_name_filter, "Polar");
        assert!(config.subscribe_on_connect);
        assert_eq!(config.timezone().unwrap(), ExportTimezone::Local);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.reconnect_delay = Duration::from_millis(1500);
        config.timezone = Some("Europe/Madrid".into());
        config
            .devices
            .set(MonitorIdentity::Horse, Some("AA:BB:CC".into()));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(loaded.devices.get(MonitorIdentity::Horse), Some("AA:BB:CC"));
        assert_eq!(
            loaded.timezone().unwrap(),
            ExportTimezone::Named(chrono_tz::Europe::Madrid)
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sensor_name_filter": "Garmin"}"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sensor_name_filter, "Garmin");
        assert_eq!(loaded.window_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_timezone_is_rejected() {
        let config = Config {
            timezone: Some("Mars/Olympus".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.timezone(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
