//! Configuration settings for the VMess auth daemon.

use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use crate::auth::HashKind;
use crate::error::DaemonError;
use crate::protocol::User;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Token window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    /// Half-width of the token window in seconds.
    #[serde(default = "default_cache_duration")]
    pub cache_duration_seconds: u64,
    /// Cadence of the background refresher in seconds.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    /// Keyed hash used to derive tokens.
    #[serde(default)]
    pub hash: HashKind,
}

/// A VMess user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// Primary user id.
    pub id: Uuid,
    /// Number of alternate ids derived from the primary id.
    #[serde(default)]
    pub alter_id: u16,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub level: u32,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_cache_duration() -> u64 {
    120
}

fn default_update_interval() -> u64 {
    10
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_duration_seconds: default_cache_duration(),
            update_interval_seconds: default_update_interval(),
            hash: HashKind::default(),
        }
    }
}

impl UserConfig {
    /// Build the user this entry describes.
    pub fn to_user(&self) -> User {
        let mut user = User::vmess(self.email.clone(), self.id, self.alter_id);
        user.level = self.level;
        user
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let settings = Self::from_toml(&content).map_err(|e| match e {
            DaemonError::Config { message } => DaemonError::Config {
                message: format!("{} ({})", message, path.display()),
            },
            other => other,
        })?;

        Ok(settings)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, DaemonError> {
        let settings: Settings = toml::from_str(content).map_err(|e| DaemonError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), DaemonError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        self.validator.validate()?;

        let mut ids = std::collections::HashSet::new();
        for user in &self.users {
            if !ids.insert(user.id) {
                return Err(DaemonError::Config {
                    message: format!("Duplicate user id {}", user.id),
                });
            }
        }

        Ok(())
    }
}

impl ValidatorConfig {
    /// Reject values the token index cannot run with.
    pub(crate) fn validate(&self) -> Result<(), DaemonError> {
        if self.cache_duration_seconds == 0 {
            return Err(DaemonError::Config {
                message: "cache_duration_seconds must be greater than zero".to_string(),
            });
        }

        // Token offsets from base_time are stored as u32 seconds.
        if self.cache_duration_seconds > u64::from(u32::MAX) / 6 {
            return Err(DaemonError::Config {
                message: format!(
                    "cache_duration_seconds {} is too large",
                    self.cache_duration_seconds
                ),
            });
        }

        if self.update_interval_seconds == 0 {
            return Err(DaemonError::Config {
                message: "update_interval_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
