//! Typed configuration from environment variables, with optional TOML
//! overrides for processing tunables.
//!
//! Loads once at startup and fails fast on missing or malformed values.
//! The database URL is wrapped in `secrecy::SecretString` so credentials
//! never reach logs.

pub mod secrets;

use crate::db::options::{
    DEFAULT_INSERT_BATCH_SIZE, DEFAULT_INTERVAL_MAX_SECS, DEFAULT_INTERVAL_MIN_SECS,
    DEFAULT_MAX_CONNECTIONS,
};
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub processing: ProcessingConfig,
}

/// Processing tunables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub insert_batch_size: usize,
    pub refresh_interval_min_secs: f64,
    pub refresh_interval_max_secs: f64,
    pub max_connections: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            refresh_interval_min_secs: DEFAULT_INTERVAL_MIN_SECS,
            refresh_interval_max_secs: DEFAULT_INTERVAL_MAX_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ProcessingConfig {
    fn validate(&self) -> Result<()> {
        if self.insert_batch_size == 0 {
            return Err(Error::Config("insert_batch_size must be positive".to_string()));
        }
        let (min, max) = (self.refresh_interval_min_secs, self.refresh_interval_max_secs);
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
            return Err(Error::Config(format!(
                "refresh interval must satisfy 0 <= min <= max, got {min}..{max}"
            )));
        }
        Ok(())
    }
}

/// Keys present in a config file's `[processing]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProcessingOverrides {
    insert_batch_size: Option<usize>,
    refresh_interval_min_secs: Option<f64>,
    refresh_interval_max_secs: Option<f64>,
    max_connections: Option<u32>,
}

impl ProcessingOverrides {
    fn parse(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        Ok(file.processing)
    }

    fn apply(self, base: &ProcessingConfig) -> Result<ProcessingConfig> {
        let merged = ProcessingConfig {
            insert_batch_size: self.insert_batch_size.unwrap_or(base.insert_batch_size),
            refresh_interval_min_secs: self
                .refresh_interval_min_secs
                .unwrap_or(base.refresh_interval_min_secs),
            refresh_interval_max_secs: self
                .refresh_interval_max_secs
                .unwrap_or(base.refresh_interval_max_secs),
            max_connections: self.max_connections.unwrap_or(base.max_connections),
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    processing: ProcessingOverrides,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = ProcessingConfig::default();
        let processing = ProcessingConfig {
            insert_batch_size: optional_var("REFRESHQ_INSERT_BATCH_SIZE")?
                .unwrap_or(defaults.insert_batch_size),
            refresh_interval_min_secs: optional_var("REFRESHQ_INTERVAL_MIN_SECS")?
                .unwrap_or(defaults.refresh_interval_min_secs),
            refresh_interval_max_secs: optional_var("REFRESHQ_INTERVAL_MAX_SECS")?
                .unwrap_or(defaults.refresh_interval_max_secs),
            max_connections: optional_var("REFRESHQ_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
        };
        processing.validate()?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            processing,
        })
    }

    /// Layer the `[processing]` table of a TOML file over the current
    /// settings. Keys missing from the file keep their environment values.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        self.processing = ProcessingOverrides::parse(&raw)?.apply(&self.processing)?;
        Ok(self)
    }
}

impl ProcessingConfig {
    /// Parse the `[processing]` table of a TOML document.
    /// Keys missing from the document take their defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        ProcessingOverrides::parse(raw)?.apply(&Self::default())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
