//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use checklist_core::AppConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

/// Settings read from `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local data file name, relative to the data directory
    #[serde(default = "default_data_file")]
    pub data_file: String,

    /// Shared directory acting as the remote store (sync disabled if unset)
    #[serde(default)]
    pub remote_dir: Option<PathBuf>,

    /// Owner principal for remote rows (sync disabled if unset)
    #[serde(default)]
    pub owner: Option<String>,

    /// Quiet period before local edits are pushed
    #[serde(default = "default_push_debounce_ms")]
    pub push_debounce_ms: u64,

    /// Maximum undo depth (0 = unbounded)
    #[serde(default)]
    pub undo_limit: usize,

    /// Add new items at the top of the list instead of the bottom
    #[serde(default)]
    pub insert_at_top: bool,

    /// Upper bound on any single remote call
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
}

fn default_data_file() -> String {
    "checklists.json".to_string()
}

fn default_push_debounce_ms() -> u64 {
    1000
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            remote_dir: None,
            owner: None,
            push_debounce_ms: default_push_debounce_ms(),
            undo_limit: 0,
            insert_at_top: false,
            remote_timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the data directory, writing the defaults on
    /// first run.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_file = data_dir.join(CONFIG_FILE);

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_file))?;
            tracing::debug!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            let config = Config::default();

            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, remote_dir: Option<&str>, owner: Option<&str>) -> Self {
        if let Some(remote_dir) = remote_dir {
            self.remote_dir = Some(expand_tilde(remote_dir));
        }
        if let Some(owner) = owner {
            self.owner = Some(owner.to_string());
        }
        self
    }

    pub fn data_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.data_file)
    }

    /// Whether both halves of a remote session are configured.
    pub fn sync_enabled(&self) -> bool {
        self.remote_dir.is_some() && self.owner.is_some()
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            insert_at_top: self.insert_at_top,
            undo_limit: self.undo_limit,
            push_debounce: Duration::from_millis(self.push_debounce_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No data directory: pass --data-dir or set CHECKLIST_DATA_DIR")]
    NoDataDir,
}

/// Data directory from the flag/environment value, else the platform default.
pub fn resolve_data_dir(explicit: Option<&str>) -> std::result::Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(expand_tilde(path)),
        None => dirs::data_dir()
            .map(|dir| dir.join("checklist"))
            .ok_or(ConfigError::NoDataDir),
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
