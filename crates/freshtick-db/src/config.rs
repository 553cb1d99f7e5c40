//! # Configuration
//!
//! Runtime settings for binaries and services built on this crate.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FRESHTICK_DB_PATH=/var/lib/freshtick/freshtick.db                  │
//! │     FRESHTICK_LOG=debug                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     path from FRESHTICK_CONFIG, or passed explicitly                   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! log_filter = "info,freshtick_db=debug,sqlx=warn"
//!
//! [database]
//! path = "./data/freshtick.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//! run_migrations = true
//!
//! [scheduler]
//! batch_size = 200
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::pool::DbConfig;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "FRESHTICK_CONFIG";

// =============================================================================
// Errors
// =============================================================================

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_connections: u32,
    /// Milliseconds a writer waits for the write lock.
    pub busy_timeout_ms: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("freshtick.db"),
            max_connections: 5,
            busy_timeout_ms: 5000,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Subscriptions fetched per materialization page.
    pub batch_size: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings { batch_size: 200 }
    }
}

// =============================================================================
// Freshtick Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshtickConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
}

impl Default for FreshtickConfig {
    fn default() -> Self {
        FreshtickConfig {
            log_filter: "info".to_string(),
            database: DatabaseSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl FreshtickConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, else `FRESHTICK_CONFIG`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "Loading config file");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Applies `FRESHTICK_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FRESHTICK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("FRESHTICK_DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_value("FRESHTICK_DB_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("FRESHTICK_DB_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_value("FRESHTICK_DB_BUSY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("FRESHTICK_DB_RUN_MIGRATIONS") {
            self.database.run_migrations = parse_value("FRESHTICK_DB_RUN_MIGRATIONS", &value)?;
        }
        if let Some(value) = lookup("FRESHTICK_SCHEDULER_BATCH_SIZE") {
            self.scheduler.batch_size = parse_value("FRESHTICK_SCHEDULER_BATCH_SIZE", &value)?;
        }
        if let Some(filter) = lookup("FRESHTICK_LOG") {
            self.log_filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "database.max_connections".to_string(),
                value: "0".to_string(),
            });
        }
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Pool settings for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .run_migrations(self.database.run_migrations)
    }

    /// Installs the global tracing subscriber.
    ///
    /// Falls back to `info` when the configured filter does not parse.
    /// Does nothing if a subscriber is already installed.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
