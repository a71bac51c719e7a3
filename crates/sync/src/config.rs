//! Layered configuration: defaults, then an optional TOML file, then `JM_*` env vars.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `JM_LOGGING__LEVEL=debug`.

use crate::coordinator::RunPolicy;
use crate::error::{Result, SyncError};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENV_PREFIX: &str = "JM";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding the shared database file.
    pub database_dir: PathBuf,
    pub lease_duration_minutes: u64,
    pub minimum_interval_minutes: u64,
    /// Age after which a `running` record is a sweep candidate.
    pub stale_run_after_minutes: u64,
    pub busy_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::from("data"),
            lease_duration_minutes: 30,
            minimum_interval_minutes: 30,
            stale_run_after_minutes: 240,
            busy_timeout_ms: 5_000,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn default_policy(&self) -> RunPolicy {
        RunPolicy::from_minutes(self.minimum_interval_minutes, self.lease_duration_minutes)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn stale_run_after(&self) -> Duration {
        Duration::from_secs(self.stale_run_after_minutes.saturating_mul(60))
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_minutes == 0 {
            return Err(invalid("lease_duration_minutes must be greater than 0"));
        }
        if self.minimum_interval_minutes == 0 {
            return Err(invalid("minimum_interval_minutes must be greater than 0"));
        }
        if self.stale_run_after_minutes == 0 {
            return Err(invalid("stale_run_after_minutes must be greater than 0"));
        }
        if self.database_dir.as_os_str().is_empty() {
            return Err(invalid("database_dir must not be empty"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `JM_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Later sources override earlier ones. A configured file that does not exist
    /// is skipped, not an error.
    pub fn load(&self) -> Result<SyncConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(SyncConfig::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
                tracing::debug!(path = %path.display(), "config file loaded");
            } else {
                tracing::debug!(path = %path.display(), "config file not found; using defaults");
            }
        }

        figment = figment.merge(Env::prefixed(&format!("{}_", self.env_prefix)).split("__"));

        let config: SyncConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(message: &str) -> SyncError {
    SyncError::InvalidInput(format!("config: {message}"))
}
