//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/callstats/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/callstats/` (~/.config/callstats/)
//! - Data: `$XDG_DATA_HOME/callstats/` (~/.local/share/callstats/)
//! - State/Logs: `$XDG_STATE_HOME/callstats/` (~/.local/state/callstats/)

use crate::error::{Error, Result};
use crate::types::RetentionPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Database location override
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Refresh behavior
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database location
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding the source and summary tables.
    /// Defaults to [`Config::database_path`].
    pub path: Option<PathBuf>,
}

/// Refresh configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Trailing window for incremental refreshes, in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Call statuses that never count toward any metric
    #[serde(default = "default_excluded_statuses")]
    pub excluded_statuses: Vec<String>,

    /// What incremental refreshes do with rows outside the window
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            excluded_statuses: default_excluded_statuses(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl RefreshConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.window_hours == 0 {
            return Err(Error::Config(
                "refresh.window_hours must be at least 1".to_string(),
            ));
        }
        if let RetentionPolicy::Expire { max_age_days: 0 } = self.retention {
            return Err(Error::Config(
                "refresh.retention.max_age_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_window_hours() -> u32 {
    2
}

fn default_excluded_statuses() -> Vec<String> {
    vec!["recording".to_string()]
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.refresh.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/callstats/config.toml` (~/.config/callstats/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("callstats").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/callstats/` (~/.local/share/callstats/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("callstats")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/callstats/` (~/.local/state/callstats/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("callstats")
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/callstats/callstats.db` (~/.local/share/callstats/callstats.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("callstats.db")
    }

    /// Returns the configured database path, falling back to the default.
    pub fn effective_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }
}
