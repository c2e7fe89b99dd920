//! Configuration file support for muxlinkmgrd
//!
//! Loads and validates configuration from TOML files.
//! Default location: /etc/sonic/muxlinkmgrd.conf

use crate::error::{MuxLinkError, MuxLinkResult};
use crate::sysfs::SYSFS_CLASS_NET;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/muxlinkmgrd.conf";

/// Sysfs configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysfsConfig {
    /// Root of the network interface tree
    #[serde(default = "default_class_net_path")]
    pub class_net_path: PathBuf,
}

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between sysfs checks after a control write, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Operation budget used when the caller doesn't give one, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

/// Complete muxlinkmgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuxLinkConfig {
    /// Sysfs configuration
    #[serde(default)]
    pub sysfs: SysfsConfig,

    /// Polling configuration
    #[serde(default)]
    pub polling: PollingConfig,
}

fn default_class_net_path() -> PathBuf {
    PathBuf::from(SYSFS_CLASS_NET)
}

fn default_interval_ms() -> u64 {
    250
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            class_net_path: default_class_net_path(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl MuxLinkConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> MuxLinkResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    MuxLinkError::config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(MuxLinkError::io(
                format!("Failed to read config file {}", path.display()),
                e,
            )),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> MuxLinkResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Get polling interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    /// Get default operation timeout as Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.default_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> MuxLinkResult<()> {
        if self.polling.interval_ms == 0 {
            return Err(MuxLinkError::config("interval_ms must be > 0"));
        }

        if self.sysfs.class_net_path.as_os_str().is_empty() {
            return Err(MuxLinkError::config("class_net_path must not be empty"));
        }

        Ok(())
    }
}
