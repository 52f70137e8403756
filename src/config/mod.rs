//! Typed configuration from environment variables, with an optional TOML
//! file for queue settings.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in `secrecy::SecretString` to keep it out
//! of logs.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::policy::DEFAULT_TIMEOUT_SECS;

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "tasks";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub queue: QueueSettings,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv().ok()` first to pick up a local `.env`.
    pub fn from_env() -> Result<Self> {
        let mut queue = QueueSettings::default();
        if let Ok(collection) = std::env::var("TASKQ_COLLECTION") {
            queue.collection = collection;
        }
        if let Ok(raw) = std::env::var("TASKQ_TIMEOUT_SECS") {
            queue.timeout_secs = parse_var("TASKQ_TIMEOUT_SECS", &raw)?;
        }
        if let Ok(raw) = std::env::var("TASKQ_SWEEP_INTERVAL_SECS") {
            queue.sweep_interval_secs = parse_var("TASKQ_SWEEP_INTERVAL_SECS", &raw)?;
        }
        queue.validate()?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            queue,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Per-queue settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Collection the queue's tasks live in.
    pub collection: String,
    /// Default reservation timeout for `apply_timeout`.
    pub timeout_secs: i64,
    /// Interval for an external timeout sweeper.
    pub sweep_interval_secs: u64,
}

impl QueueSettings {
    /// Interval between sweeps as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            sweep_interval_secs: 30,
        }
    }
}

impl QueueSettings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid queue settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(Error::Config("collection must not be empty".to_string()));
        }
        if self.timeout_secs < 0 {
            return Err(Error::Config(format!(
                "timeout_secs must be non-negative, got {}",
                self.timeout_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
}
