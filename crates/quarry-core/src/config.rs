//! Configuration types and loading
//!
//! Settings come from defaults, an optional TOML file, and environment
//! variables, in increasing order of precedence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database pool configuration
    pub database: DatabaseConfig,

    /// Migration tracker configuration
    pub migrations: MigrationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection acquire timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout for connections in seconds
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection in seconds
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/quarry".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DatabaseConfig {
    /// Create config with a specific URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding migration scripts
    pub directory: PathBuf,
    /// Name of the tracking table
    pub table: String,
    /// Recognized script extension, without the dot
    pub extension: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            table: "migrations".to_string(),
            extension: "sql".to_string(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Config file error: {0}")]
    FileError(#[from] ::config::ConfigError),
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(v) = env_parse("DB_MAX_CONNECTIONS")? {
            config.database.max_connections = v;
        }
        if let Some(v) = env_parse("DB_MIN_CONNECTIONS")? {
            config.database.min_connections = v;
        }
        if let Some(v) = env_parse("DB_CONNECT_TIMEOUT")? {
            config.database.connect_timeout_secs = v;
        }
        if let Some(v) = env_parse("DB_IDLE_TIMEOUT")? {
            config.database.idle_timeout_secs = v;
        }
        if let Some(v) = env_parse("DB_MAX_LIFETIME")? {
            config.database.max_lifetime_secs = v;
        }

        if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
            config.migrations.directory = PathBuf::from(dir);
        }
        if let Ok(table) = std::env::var("MIGRATIONS_TABLE") {
            config.migrations.table = table;
        }

        Ok(config)
    }

    /// Layer an optional TOML file and `QUARRY__*` variables over the
    /// environment-derived configuration.
    ///
    /// `QUARRY__DATABASE__URL=postgres://...` overrides `database.url`.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let base = Self::from_env()?;
        let defaults = ::config::Config::try_from(&base)?;

        let mut builder = ::config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("QUARRY").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
