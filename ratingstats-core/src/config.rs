//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/ratingstats/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/ratingstats/` (~/.config/ratingstats/)
//! - Data: `$XDG_DATA_HOME/ratingstats/` (~/.local/share/ratingstats/)
//! - Cache: `$XDG_CACHE_HOME/ratingstats/` (~/.cache/ratingstats/)
//! - State/Logs: `$XDG_STATE_HOME/ratingstats/` (~/.local/state/ratingstats/)

use crate::error::{Error, Result};
use crate::field::RatingType;
use crate::jobs::Schedule;
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

/// Returns XDG_CACHE_HOME or ~/.cache
fn xdg_cache_home() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".cache"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Public-facing name, used in job descriptions and export filenames
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,

    /// Defaults applied to rating fields that omit a setting
    #[serde(default)]
    pub fields: FieldsConfig,

    /// Statistics listing configuration
    #[serde(default)]
    pub statistics: StatisticsConfig,

    /// Statistics cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_name: default_plugin_name(),
            fields: FieldsConfig::default(),
            statistics: StatisticsConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_plugin_name() -> String {
    "Rating Field".to_string()
}

/// Rating field defaults
#[derive(Debug, Deserialize, Clone)]
pub struct FieldsConfig {
    /// Rating type used when a field does not specify one
    #[serde(default = "default_rating_type")]
    pub default_rating_type: RatingType,

    /// Minimum rating (0 or 1)
    #[serde(default = "default_min_rating")]
    pub default_min_rating: i32,

    /// Maximum rating (3 to 10)
    #[serde(default = "default_max_rating")]
    pub default_max_rating: i32,

    /// Allow half ratings (star type only)
    #[serde(default)]
    pub default_allow_half_ratings: bool,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            default_rating_type: default_rating_type(),
            default_min_rating: default_min_rating(),
            default_max_rating: default_max_rating(),
            default_allow_half_ratings: false,
        }
    }
}

impl FieldsConfig {
    /// Validate the defaults against the permitted rating domain
    pub fn validate(&self) -> Result<()> {
        if !(0..=1).contains(&self.default_min_rating) {
            return Err(Error::Config(
                "fields.default_min_rating must be 0 or 1".to_string(),
            ));
        }
        if !(3..=10).contains(&self.default_max_rating) {
            return Err(Error::Config(
                "fields.default_max_rating must be between 3 and 10".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_rating_type() -> RatingType {
    RatingType::Star
}

fn default_min_rating() -> i32 {
    1
}

fn default_max_rating() -> i32 {
    5
}

/// Statistics listing configuration
#[derive(Debug, Deserialize)]
pub struct StatisticsConfig {
    /// Forms shown per page in the form listing
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
        }
    }
}

fn default_items_per_page() -> usize {
    50
}

/// Where cached statistics are stored
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMethod {
    /// One file per cache key
    #[default]
    File,
    /// Shared key-value store (SQLite file shared by all processes)
    External,
}

impl StorageMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMethod::File => "file",
            StorageMethod::External => "external",
        }
    }
}

/// Statistics cache configuration
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Backing store for cached statistics
    #[serde(default)]
    pub storage: StorageMethod,

    /// Regeneration schedule. `manual` enables invalidation on submission save.
    #[serde(default)]
    pub schedule: Schedule,

    /// Override for the file cache directory
    pub path: Option<PathBuf>,

    /// Override for the external store database file
    pub external_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: StorageMethod::File,
            schedule: Schedule::Manual,
            path: None,
            external_path: None,
        }
    }
}

impl CacheConfig {
    /// Directory holding `*.cache` files
    pub fn file_dir(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::cache_dir().join("statistics"))
    }

    /// Database file backing the external store
    pub fn external_store_path(&self) -> PathBuf {
        self.external_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("cache.db"))
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of rotated files kept per binary
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Mirror log events to stderr (for interactive worker runs)
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr: false,
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

        config.fields.validate()?;
        if config.statistics.items_per_page == 0 {
            return Err(Error::Config(
                "statistics.items_per_page must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/ratingstats/config.toml` (~/.config/ratingstats/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("ratingstats").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/ratingstats/` (~/.local/share/ratingstats/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("ratingstats")
    }

    /// Returns the cache directory path
    ///
    /// `$XDG_CACHE_HOME/ratingstats/` (~/.cache/ratingstats/)
    pub fn cache_dir() -> PathBuf {
        xdg_cache_home().join("ratingstats")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/ratingstats/` (~/.local/state/ratingstats/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("ratingstats")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/ratingstats/data.db` (~/.local/share/ratingstats/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path for one binary
    ///
    /// `$XDG_STATE_HOME/ratingstats/{component}.log`
    pub fn log_path(component: &str) -> PathBuf {
        Self::state_dir().join(format!("{}.log", component))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }

        if std::env::var("XDG_CACHE_HOME").is_err() {
            std::env::set_var("XDG_CACHE_HOME", home.join(".cache"));
        }
    }
}
