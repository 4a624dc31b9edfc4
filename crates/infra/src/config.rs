//! Configuration loading and representation.
//!
//! Sources are layered, later ones overriding earlier ones:
//! 1. Default values in code
//! 2. An optional configuration file (`config/minierp.toml` by default)
//! 3. Environment variables with the `MINIERP_` prefix, `__` between
//!    sections (e.g. `MINIERP_DATABASE__LOCK_TIMEOUT_MS=500`)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "config/minierp";

/// Main application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub retry: RetrySettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Row-lock wait bound applied to every stock transaction
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub batch_base_delay_ms: u64,
    pub adjust_base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,

    /// JSON lines (true) or human-readable output (false)
    pub json: bool,
}

impl Settings {
    /// Load configuration from the default file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Some(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration, optionally layering the given file (extension
    /// inferred, missing file ignored) under the environment.
    pub fn load_from(file: Option<&str>) -> Result<Self, ConfigError> {
        Self::build(file, environment())
    }

    fn build(file: Option<&str>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("database.url", "postgres://localhost/minierp")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.lock_timeout_ms", 3000)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.batch_base_delay_ms", 100)?
            .set_default("retry.adjust_base_delay_ms", 50)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("retry.max_delay_ms", 2000)?
            .set_default("retry.jitter", true)?
            .set_default("log.filter", "info")?
            .set_default("log.json", true)?;

        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        builder.add_source(env).build()?.try_deserialize()
    }
}

/// `MINIERP_` prefix, `__` between nested keys.
fn environment() -> Environment {
    Environment::with_prefix("MINIERP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
