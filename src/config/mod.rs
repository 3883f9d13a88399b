//! Configuration management for ClipMirror
//!
//! This module handles loading and validating the daemon configuration.
//! Every field has a serde default, so a missing or partial config file
//! always yields a usable snapshot.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Peer sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// History configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Override for the on-disk cache location
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

/// Peer sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether clipboard mirroring to the peer is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// History configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of clipboard entries to keep
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Ceiling on the persisted index size in megabytes; an index larger
    /// than this on startup is treated as corrupt and the cache is reset
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u64,

    /// Number of characters shown per entry in history listings
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
}

impl Config {
    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`~/.config/clipmirror/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("io", "clipmirror", "clipmirror")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Root directory for the persisted index and blob files.
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        ProjectDirs::from("io", "clipmirror", "clipmirror")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("clipmirror"))
    }

    /// Check value ranges; called after every load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.max_entries == 0 || self.history.max_entries > 1000 {
            return Err(ConfigError::Validation(format!(
                "history.max_entries must be between 1 and 1000, got {}",
                self.history.max_entries
            )));
        }
        if self.history.cache_size_mb == 0 {
            return Err(ConfigError::Validation(
                "history.cache_size_mb must be at least 1".to_string(),
            ));
        }
        if self.history.preview_length == 0 {
            return Err(ConfigError::Validation(
                "history.preview_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            history: HistoryConfig::default(),
            log_level: default_log_level(),
            cache_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            cache_size_mb: default_cache_size_mb(),
            preview_length: default_preview_length(),
        }
    }
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    25
}

fn default_cache_size_mb() -> u64 {
    10
}

fn default_preview_length() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}
