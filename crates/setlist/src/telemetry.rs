//! Logging setup

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.default_filter)
            .with_context(|| format!("Invalid log filter '{}'", config.default_filter)),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured default filter. Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(config)?)
        .with(fmt::layer().with_ansi(config.ansi).with_target(true))
        .try_init()
        .context("A global tracing subscriber is already installed")
}

/// Like `init_logging`, but a no-op when a subscriber is already installed.
/// Meant for tests, which may each try to set up logging.
pub fn try_init_logging(config: &LoggingConfig) {
    let Ok(filter) = filter(config) else {
        return;
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(config.ansi).with_test_writer())
        .try_init();
}
