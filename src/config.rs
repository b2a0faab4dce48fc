//! TOML configuration with defaults and environment overrides.
//!
//! Default location: `<config_dir>/chunkpath/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::scheduler::{DEFAULT_EASE_FACTOR, MIN_EASE_FACTOR};

const APP_DIR: &str = "chunkpath";
const DEFAULT_DB_NAME: &str = "chunkpath.db";
const CONFIG_FILE: &str = "config.toml";

pub const DB_ENV: &str = "CHUNKPATH_DB";
pub const MAX_INTERVAL_ENV: &str = "CHUNKPATH_MAX_INTERVAL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ease factor given to a chunk on first exposure.
    pub initial_ease: f64,
    /// Upper bound on review intervals in days. Unbounded when absent.
    pub max_interval_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_ease: DEFAULT_EASE_FACTOR,
            max_interval_days: None,
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load from `path`, or from the default location when it exists, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => {
                let default_path = config_dir().join(CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("failed to parse config: {}", e)))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(DB_ENV) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Ok(raw) = std::env::var(MAX_INTERVAL_ENV) {
            let days = raw.trim().parse::<u32>().map_err(|_| {
                EngineError::Config(format!("{} must be a whole number of days, got '{}'", MAX_INTERVAL_ENV, raw))
            })?;
            self.scheduler.max_interval_days = Some(days);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.initial_ease < MIN_EASE_FACTOR {
            return Err(EngineError::Config(format!(
                "initial_ease must be at least {}",
                MIN_EASE_FACTOR
            )));
        }
        if self.scheduler.max_interval_days == Some(0) {
            return Err(EngineError::Config(
                "max_interval_days must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Database location; creates the default directory on demand.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        let dir = config_dir();
        std::fs::create_dir_all(&dir).ok();
        dir.join(DEFAULT_DB_NAME)
    }
}
