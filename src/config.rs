//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::projection::DEFAULT_CHECKPOINT;
use crate::snapshot::SnapshotPolicy;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// How long to wait for a pooled connection
    pub database_acquire_timeout: Duration,

    /// Environment (development, production)
    pub environment: String,

    /// Snapshot every N events; 0 disables snapshots
    pub snapshot_interval: u64,

    /// Events fetched per projection batch
    pub projection_batch_size: i64,

    /// Delay between projection runs
    pub projection_poll_interval: Duration,

    /// Checkpoint the projection engine reads and advances
    pub projection_checkpoint: String,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;
        let acquire_timeout_secs: u64 = parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?;
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        let snapshot_interval: u64 = parse_or(&lookup, "SNAPSHOT_INTERVAL", 10)?;
        if i64::try_from(snapshot_interval).is_err() {
            return Err(ConfigError::InvalidValue("SNAPSHOT_INTERVAL"));
        }

        let projection_batch_size: i64 = parse_or(&lookup, "PROJECTION_BATCH_SIZE", 100)?;
        if projection_batch_size < 1 {
            return Err(ConfigError::InvalidValue("PROJECTION_BATCH_SIZE"));
        }

        let poll_interval_ms: u64 = parse_or(&lookup, "PROJECTION_POLL_INTERVAL_MS", 1000)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("PROJECTION_POLL_INTERVAL_MS"));
        }

        let projection_checkpoint =
            lookup("PROJECTION_CHECKPOINT").unwrap_or_else(|| DEFAULT_CHECKPOINT.to_string());
        if projection_checkpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue("PROJECTION_CHECKPOINT"));
        }

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            environment,
            snapshot_interval,
            projection_batch_size,
            projection_poll_interval: Duration::from_millis(poll_interval_ms),
            projection_checkpoint,
            log_format,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::every(self.snapshot_interval)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/orders")]).unwrap();

        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.database_acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::EveryNEvents(10));
        assert_eq!(config.projection_batch_size, 100);
        assert_eq!(config.projection_poll_interval, Duration::from_millis(1000));
        assert_eq!(config.projection_checkpoint, "global");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.is_production());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/orders"),
            ("ENVIRONMENT", "production"),
            ("SNAPSHOT_INTERVAL", "0"),
            ("PROJECTION_BATCH_SIZE", "500"),
            ("PROJECTION_CHECKPOINT", "reporting"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::Never);
        assert_eq!(config.projection_batch_size, 500);
        assert_eq!(config.projection_checkpoint, "reporting");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::MissingEnv("DATABASE_URL"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "x"), ("PROJECTION_BATCH_SIZE", "0")]),
            Err(ConfigError::InvalidValue("PROJECTION_BATCH_SIZE"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "x"), ("SNAPSHOT_INTERVAL", "often")]),
            Err(ConfigError::InvalidValue("SNAPSHOT_INTERVAL"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "x"), ("SNAPSHOT_INTERVAL", "9223372036854775808")]),
            Err(ConfigError::InvalidValue("SNAPSHOT_INTERVAL"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "x"), ("LOG_FORMAT", "xml")]),
            Err(ConfigError::InvalidValue("LOG_FORMAT"))
        ));
    }
}
