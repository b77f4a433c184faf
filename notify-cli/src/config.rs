use std::path::Path;

use anyhow::{Context, Result};
use notify_engine::EngineConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_DATABASE_URL: &str = "sqlite://notify.db";

/// `notifyctl` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SQLite database holding notification settings.
    pub database_url: String,
    /// Log filter directive applied once the config is loaded. Ignored with
    /// `--verbose` or `--quiet`.
    pub log_filter: Option<String>,
    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_filter: None,
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from a TOML file, or from the environment when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))
            }
            None => {
                let engine = EngineConfig::from_env()?;
                let database_url = std::env::var("NOTIFY_DATABASE_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
                let log_filter = std::env::var("NOTIFY_LOG_FILTER")
                    .ok()
                    .filter(|v| !v.trim().is_empty());
                Ok(Self {
                    database_url,
                    log_filter,
                    engine,
                })
            }
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.engine.validate()?;
        Ok(config)
    }
}
