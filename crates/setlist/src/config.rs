//! Engine configuration, loaded from YAML with environment overrides

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::behavior::{DEFAULT_MIN_INTERVAL_SECS, MAX_MIN_INTERVAL_SECS, min_interval_from_secs};
use crate::remote::RateLimitConfig;

pub const ENV_BASE_URL: &str = "SETLIST_BASE_URL";
pub const ENV_LOG: &str = "SETLIST_LOG";
pub const ENV_STORE_PATH: &str = "SETLIST_STORE_PATH";

pub const DEFAULT_BASE_URL: &str = "https://api.relisten.net/api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub default_filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    /// SQLite file backing the local store; in-memory when unset
    pub store_path: Option<PathBuf>,
    pub default_min_interval_secs: i64,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            store_path: None,
            default_min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(content).context("Failed to parse engine config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, then apply `SETLIST_*` environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|value| !value.trim().is_empty()) {
            self.base_url = base_url;
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|value| !value.trim().is_empty()) {
            self.logging.default_filter = filter;
        }
        if let Some(path) = lookup(ENV_STORE_PATH).filter(|value| !value.trim().is_empty()) {
            self.store_path = Some(PathBuf::from(path));
        }
    }

    pub fn default_min_interval(&self) -> Duration {
        min_interval_from_secs(self.default_min_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.base_url.trim().is_empty(), "base_url must not be empty");
        validate_interval_secs("default_min_interval_secs", self.default_min_interval_secs)?;
        self.rate_limit.validate()
    }
}

/// Minimum intervals must lie in `0..=MAX_MIN_INTERVAL_SECS`
pub fn validate_interval_secs(name: &str, secs: i64) -> Result<()> {
    anyhow::ensure!(
        (0..=MAX_MIN_INTERVAL_SECS).contains(&secs),
        "{name} must be between 0 and {MAX_MIN_INTERVAL_SECS} seconds, got {secs}"
    );
    Ok(())
}
