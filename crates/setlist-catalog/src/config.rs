//! Catalog configuration: engine settings plus per-behavior fetch overrides
//!
//! ```yaml
//! base_url: https://api.relisten.net/api
//! default_min_interval_secs: 900
//! behaviors:
//!   ArtistsBehavior:
//!     strategy: network_always_first
//!   YearShowsBehavior:
//!     min_interval_secs: 60
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use setlist::behavior::{FetchStrategy, min_interval_from_secs};
use setlist::config::{EngineConfig, validate_interval_secs};

use crate::behaviors::BehaviorSettings;

/// Override for one behavior kind; unset fields keep the behavior's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorOverride {
    pub strategy: Option<FetchStrategy>,
    pub min_interval_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    /// Keyed by behavior kind, e.g. `ArtistsBehavior`
    pub behaviors: HashMap<String, BehaviorOverride>,
}

impl CatalogConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CatalogConfig =
            serde_yaml::from_str(content).context("Failed to parse catalog config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        for (kind, behavior) in &self.behaviors {
            if let Some(secs) = behavior.min_interval_secs {
                validate_interval_secs(&format!("behaviors.{kind}.min_interval_secs"), secs)?;
            }
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.engine.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Effective settings for behavior `kind`, starting from `default_strategy`
    /// and the engine-wide minimum interval
    pub fn settings_for(&self, kind: &str, default_strategy: FetchStrategy) -> BehaviorSettings {
        let mut settings = BehaviorSettings {
            strategy: default_strategy,
            min_interval: self.engine.default_min_interval(),
        };
        if let Some(behavior) = self.behaviors.get(kind) {
            if let Some(strategy) = behavior.strategy {
                settings.strategy = strategy;
            }
            if let Some(secs) = behavior.min_interval_secs {
                settings.min_interval = min_interval_from_secs(secs);
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use setlist::behavior::MAX_MIN_INTERVAL_SECS;

    use super::*;

    #[test]
    fn test_overrides_apply_per_kind() {
        let config = CatalogConfig::from_yaml_str(
            r#"
base_url: http://localhost:9000
default_min_interval_secs: 300
behaviors:
  ArtistsBehavior:
    strategy: network_always_first
  YearShowsBehavior:
    min_interval_secs: 60
"#,
        )
        .unwrap();

        assert_eq!(config.engine.base_url, "http://localhost:9000");

        let artists = config.settings_for("ArtistsBehavior", FetchStrategy::StaleWhileRevalidate);
        assert_eq!(artists.strategy, FetchStrategy::NetworkAlwaysFirst);
        assert_eq!(artists.min_interval, Duration::seconds(300));

        let shows = config.settings_for("YearShowsBehavior", FetchStrategy::StaleWhileRevalidate);
        assert_eq!(shows.strategy, FetchStrategy::StaleWhileRevalidate);
        assert_eq!(shows.min_interval, Duration::seconds(60));

        let other = config.settings_for("YearsBehavior", FetchStrategy::LocalOnly);
        assert_eq!(other.strategy, FetchStrategy::LocalOnly);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CatalogConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, CatalogConfig::default());
    }

    #[test]
    fn test_engine_section_is_validated() {
        for yaml in [
            "default_min_interval_secs: -10",
            "rate_limit:\n  capacity: 0",
            "rate_limit:\n  refill_per_sec: -2.0",
            "behaviors:\n  ArtistsBehavior:\n    min_interval_secs: 9223372036854775807\n",
        ] {
            assert!(CatalogConfig::from_yaml_str(yaml).is_err(), "{yaml} accepted");
        }
    }

    #[test]
    fn test_huge_override_in_unvalidated_config_does_not_panic() {
        let mut config = CatalogConfig::default();
        config.behaviors.insert(
            "ArtistsBehavior".to_string(),
            BehaviorOverride {
                strategy: None,
                min_interval_secs: Some(i64::MAX),
            },
        );
        let settings = config.settings_for("ArtistsBehavior", FetchStrategy::StaleWhileRevalidate);
        assert_eq!(settings.min_interval, Duration::seconds(MAX_MIN_INTERVAL_SECS));
    }

    #[test]
    fn test_negative_interval_rejected() {
        let result = CatalogConfig::from_yaml_str(
            "behaviors:\n  ArtistsBehavior:\n    min_interval_secs: -5\n",
        );
        assert!(result.is_err());
    }
}
