use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;
/// With the default poll interval this refreshes devices about every 5s.
pub const DEFAULT_DEVICE_REFRESH_TICKS: u32 = 25;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address of the backend engine's command socket
    pub backend_addr: String,
    /// Session status poll period
    pub poll_interval_ms: u64,
    /// Upper bound for a single backend command
    pub request_timeout_ms: u64,
    /// Refresh the device list every N polls; 0 disables periodic refresh
    pub device_refresh_ticks: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backend_addr: DEFAULT_BACKEND_ADDR.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            device_refresh_ticks: DEFAULT_DEVICE_REFRESH_TICKS,
        }
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be greater than 0".to_string()));
        }
        if self.backend_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("backend_addr must not be empty".to_string()));
        }
        Ok(())
    }

    /// Loads the config from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No controller config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!(
            "Loaded controller config: backend_addr={}, poll_interval_ms={}, request_timeout_ms={}, device_refresh_ticks={}",
            config.backend_addr, config.poll_interval_ms, config.request_timeout_ms, config.device_refresh_ticks
        );
        Ok(config)
    }

    /// Loads from the platform default location.
    pub fn load() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
                info!("Created config directory: {:?}", parent);
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved controller config to {:?}", path);
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }
}

/// `<config dir>/voice/controller.json`, e.g. `~/.config/voice/controller.json`
/// on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("voice").join("controller.json"))
}
