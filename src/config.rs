//! Configuration management
//!
//! TOML configuration with per-field defaults and environment variable
//! overrides. A missing section or key falls back to its default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! [redis]
//! url = "redis://127.0.0.1:6379"
//! pool_size = 16
//! command_timeout_ms = 5000
//!
//! [query]
//! timezone = "Europe/Amsterdam"
//! filter_chunk_size = 128
//!
//! [logging]
//! level = "info"
//! ```

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::calendar::parse_timezone;
use crate::error::{Error, Result};
use crate::planner::{PlannerConfig, MAX_FILTER_CHUNK};
use crate::range::Alignment;
use crate::redis::RedisConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisSection,

    /// Query planning settings
    #[serde(default)]
    pub query: QuerySection,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedisSection {
    /// Server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum in-flight pipelines
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Timeout for a whole pipeline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Use TLS (`rediss://`)
    #[serde(default)]
    pub tls: bool,
}

/// Query planning settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuerySection {
    /// IANA timezone for calendar buckets
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Timestamp filter values per sub-query
    #[serde(default = "default_filter_chunk_size")]
    pub filter_chunk_size: usize,

    /// Emit NaN placeholders for empty calendar buckets
    #[serde(default = "default_true")]
    pub include_empty_buckets: bool,

    /// Bucket alignment (`start`, `end` or a timestamp)
    #[serde(default = "default_alignment")]
    pub default_alignment: String,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_timeout_ms() -> u64 { 5000 }
fn default_timezone() -> String { "UTC".to_string() }
fn default_filter_chunk_size() -> usize { MAX_FILTER_CHUNK }
fn default_alignment() -> String { "start".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_timeout_ms(),
            command_timeout_ms: default_timeout_ms(),
            tls: false,
        }
    }
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            filter_chunk_size: default_filter_chunk_size(),
            include_empty_buckets: true,
            default_alignment: default_alignment(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load a file, then apply environment overrides
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `TSQUERY_*` and `RUST_LOG` overrides
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TSQUERY_REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(timezone) = std::env::var("TSQUERY_TIMEZONE") {
            self.query.timezone = timezone;
        }
        if let Ok(chunk) = std::env::var("TSQUERY_FILTER_CHUNK_SIZE") {
            if let Ok(n) = chunk.parse() {
                self.query.filter_chunk_size = n;
            }
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.redis_config().validate()?;
        self.planner_config()?;
        self.default_alignment()?;
        Ok(())
    }

    /// Configured timezone
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.query.timezone)
    }

    /// Configured alignment
    pub fn default_alignment(&self) -> Result<Alignment> {
        self.query.default_alignment.parse()
    }

    /// Connection pool settings
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.redis.url.clone())
            .pool_size(self.redis.pool_size)
            .connection_timeout(Duration::from_millis(self.redis.connection_timeout_ms))
            .command_timeout(Duration::from_millis(self.redis.command_timeout_ms))
            .tls(self.redis.tls)
    }

    /// Planner settings, validated
    pub fn planner_config(&self) -> Result<PlannerConfig> {
        let config = PlannerConfig {
            timezone: self.timezone()?,
            filter_chunk_size: self.query.filter_chunk_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ApplicationConfig::default();
        assert_eq!(config.redis.pool_size, 16);
        assert_eq!(config.query.filter_chunk_size, 128);
        assert_eq!(config.query.timezone, "UTC");
        assert!(config.query.include_empty_buckets);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[query]\ntimezone = \"Europe/Amsterdam\"").unwrap();

        let config = ApplicationConfig::load(file.path()).unwrap();
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Amsterdam);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsquery.toml");

        let mut config = ApplicationConfig::default();
        config.redis.command_timeout_ms = 750;
        config.query.default_alignment = "end".to_string();
        config.save(&path).unwrap();

        let loaded = ApplicationConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_alignment().unwrap(), Alignment::End);
        assert_eq!(
            loaded.redis_config().command_timeout,
            Duration::from_millis(750)
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ApplicationConfig::default();
        config.query.timezone = "Mars/Olympus_Mons".to_string();
        assert!(matches!(config.validate(), Err(Error::Timezone(_))));

        let mut config = ApplicationConfig::default();
        config.query.filter_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.query.filter_chunk_size = 500;
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.redis.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.redis.url = String::new();
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.query.default_alignment = "middle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[redis\nurl = ").unwrap();
        assert!(matches!(
            ApplicationConfig::load(file.path()),
            Err(Error::Configuration(_))
        ));

        assert!(ApplicationConfig::load("/nonexistent/tsquery.toml").is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TSQUERY_FILTER_CHUNK_SIZE", "64");
        std::env::set_var("TSQUERY_TIMEZONE", "America/New_York");
        let config = ApplicationConfig::from_env();
        std::env::remove_var("TSQUERY_FILTER_CHUNK_SIZE");
        std::env::remove_var("TSQUERY_TIMEZONE");

        assert_eq!(config.query.filter_chunk_size, 64);
        assert_eq!(config.query.timezone, "America/New_York");
    }
}
