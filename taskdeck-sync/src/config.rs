//! Configuration loading for the Taskdeck sync layer.
//!
//! All fields are required. No defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub persistence_dir: PathBuf,
    /// Window after startup during which auth-dependent decisions wait for
    /// persisted state to load.
    pub rehydration_grace_ms: u64,
    /// Buffer size of the notification and session broadcast channels.
    pub event_channel_capacity: usize,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

/// How long each notification kind stays visible.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    pub success_ms: u64,
    pub error_ms: u64,
    pub warning_ms: u64,
    pub info_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TASKDECK_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(invalid("api_base_url", "must start with http:// or https://"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.persistence_dir.as_os_str().is_empty() {
            return Err(invalid("persistence_dir", "must not be empty"));
        }
        if self.event_channel_capacity == 0 {
            return Err(invalid("event_channel_capacity", "must be > 0"));
        }
        let durations = [
            ("notifications.success_ms", self.notifications.success_ms),
            ("notifications.error_ms", self.notifications.error_ms),
            ("notifications.warning_ms", self.notifications.warning_ms),
            ("notifications.info_ms", self.notifications.info_ms),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(invalid(field, "must be > 0"));
            }
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "must not be empty"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rehydration_grace(&self) -> Duration {
        Duration::from_millis(self.rehydration_grace_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("TASKDECK_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
pub(crate) fn test_config(persistence_dir: &Path) -> SyncConfig {
    SyncConfig {
        api_base_url: "http://localhost:4000/api".to_string(),
        request_timeout_ms: 10_000,
        persistence_dir: persistence_dir.to_path_buf(),
        rehydration_grace_ms: 300,
        event_channel_capacity: 64,
        notifications: NotificationConfig {
            success_ms: 3_000,
            error_ms: 5_000,
            warning_ms: 4_000,
            info_ms: 3_000,
        },
        logging: LoggingConfig {
            filter: "taskdeck_sync=debug".to_string(),
            json: false,
        },
    }
}
