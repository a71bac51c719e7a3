//! Subscriber setup for binaries. The library itself only emits `tracing` events.

use crate::config::LoggingConfig;
use crate::error::{Result, SyncError};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Env var that overrides `LoggingConfig::level` with a full filter directive.
pub const LOG_ENV: &str = "JM_LOG";

/// Installs the global subscriber. Logs go to stderr so stdout stays machine-readable.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|err| SyncError::Logging(format!("bad level {:?}: {err}", config.level)))?,
    };

    let registry = Registry::default().with(filter);
    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
    installed.map_err(|err| SyncError::Logging(err.to_string()))
}
