//! TeleClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TeleclawError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeleclawConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> String { "~/.teleclaw".into() }

impl Default for TeleclawConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TeleclawConfig {
    /// Load config from the default path (~/.teleclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TeleclawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TeleclawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TeleclawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TeleClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".teleclaw")
    }

    /// Resolved database path (`~` expanded, relative paths under `data_dir`).
    pub fn database_path(&self) -> PathBuf {
        let db = PathBuf::from(expand_path(&self.database.path));
        if db.is_absolute() {
            db
        } else {
            PathBuf::from(expand_path(&self.data_dir)).join(db)
        }
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> String {
    shellexpand::full(p)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| shellexpand::tilde(p).to_string())
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "teleclaw.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Scheduling engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Message ids remembered per (account, target) by the comment deduplicator.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Status events kept by the in-memory history sink.
    #[serde(default = "default_status_history")]
    pub status_history: usize,
    /// Reattach tasks persisted as running when the daemon starts.
    #[serde(default = "bool_true")]
    pub restore_on_start: bool,
}

fn default_dedup_capacity() -> usize { 1000 }
fn default_status_history() -> usize { 100 }
fn bool_true() -> bool { true }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            status_history: default_status_history(),
            restore_on_start: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "teleclaw=info,teleclaw_scheduler=info".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
