//! Configuration file support for pcrflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PCRFLASH_*)
//! 3. Local config file (./pcrflash.toml)
//! 4. Global config file (~/.config/pcrflash/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use pcrflash::YmodemConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local config file, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pcrflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// YMODEM timing, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// How long to wait for the receiver's first 'C'.
    pub ready_timeout_ms: Option<u64>,
    /// How long to wait for each block reply.
    pub ack_timeout_ms: Option<u64>,
    /// Read slice between cancel checks.
    pub poll_interval_ms: Option<u64>,
}

impl TransferConfig {
    /// Sender timing with unset fields left at their defaults.
    pub fn to_ymodem(&self) -> YmodemConfig {
        let defaults = YmodemConfig::default();
        let ms = |value: Option<u64>, fallback: Duration| {
            value.map_or(fallback, Duration::from_millis)
        };

        YmodemConfig {
            ready_timeout: ms(self.ready_timeout_ms, defaults.ready_timeout),
            ack_timeout: ms(self.ack_timeout_ms, defaults.ack_timeout),
            poll_interval: ms(self.poll_interval_ms, defaults.poll_interval)
                .max(Duration::from_millis(1)),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer timing.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pcrflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one, field by field.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.transfer.ready_timeout_ms.is_some() {
            self.transfer.ready_timeout_ms = other.transfer.ready_timeout_ms;
        }
        if other.transfer.ack_timeout_ms.is_some() {
            self.transfer.ack_timeout_ms = other.transfer.ack_timeout_ms;
        }
        if other.transfer.poll_interval_ms.is_some() {
            self.transfer.poll_interval_ms = other.transfer.poll_interval_ms;
        }
    }
}
