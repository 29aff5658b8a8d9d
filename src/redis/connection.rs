//! Redis connection pool
//!
//! Wraps one multiplexed connection behind a semaphore that bounds the
//! number of in-flight pipelines. Every pipeline is sent exactly once and is
//! bounded by the command timeout as a whole; failures are reported to the
//! caller, never retried here. A dropped connection is discarded so the
//! next call reconnects.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_tsquery::redis::{RedisConfig, RedisPool};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::with_url("redis://localhost:6379")
//!     .pool_size(8)
//!     .command_timeout(Duration::from_secs(2));
//!
//! let pool = RedisPool::new(config).await?;
//! println!("pipelines sent: {}", pool.metrics().pipelines_executed);
//! # Ok(())
//! # }
//! ```

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use super::util::{is_tls_url, safe_redis_error, sanitize_url};
use crate::error::{Error, Result};

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of in-flight pipelines
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing the connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for one whole pipeline
    /// Default: 5 seconds
    pub command_timeout: Duration,

    /// Enable TLS for connections
    /// Default: false
    pub tls_enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            tls_enabled: false,
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the pipeline timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Enable or disable TLS (`rediss://` URLs, needs the `redis-tls` feature)
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Configuration("Redis URL cannot be empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(Error::Configuration(
                "Pool size must be greater than 0".to_string(),
            ));
        }
        if self.pool_size > 1000 {
            return Err(Error::Configuration("Pool size cannot exceed 1000".to_string()));
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return Err(Error::Configuration(
                "TLS is enabled but the 'redis-tls' feature is not compiled".to_string(),
            ));
        }

        if self.tls_enabled != is_tls_url(&self.url) {
            return Err(Error::Configuration(format!(
                "TLS is {} but URL {} uses the {} scheme",
                if self.tls_enabled { "enabled" } else { "disabled" },
                sanitize_url(&self.url),
                if is_tls_url(&self.url) { "rediss://" } else { "redis://" }
            )));
        }

        Ok(())
    }
}

/// Connection pool metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total number of successful connections
    pub connections_created: AtomicU64,

    /// Total number of connection failures
    pub connection_failures: AtomicU64,

    /// Pipelines sent
    pub pipelines_executed: AtomicU64,

    /// Commands carried by those pipelines
    pub commands_executed: AtomicU64,

    /// Pipelines that failed or timed out
    pub pipeline_failures: AtomicU64,

    /// Total pipeline latency in microseconds
    pub total_latency_us: AtomicU64,
}

impl PoolMetrics {
    /// Record a successful connection
    pub fn record_connection(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection failure
    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed pipeline of `commands` commands
    pub fn record_pipeline(&self, commands: usize, latency: Duration) {
        self.pipelines_executed.fetch_add(1, Ordering::Relaxed);
        self.commands_executed
            .fetch_add(commands as u64, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed pipeline
    pub fn record_pipeline_failure(&self) {
        self.pipeline_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Average pipeline latency in microseconds
    pub fn average_latency_us(&self) -> f64 {
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let count = self.pipelines_executed.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Get a snapshot of the metrics
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            pipelines_executed: self.pipelines_executed.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            pipeline_failures: self.pipeline_failures.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
        }
    }
}

/// Snapshot of pool metrics at a point in time
#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    /// Connections created during pool lifetime
    pub connections_created: u64,
    /// Connection failures during pool lifetime
    pub connection_failures: u64,
    /// Pipelines sent
    pub pipelines_executed: u64,
    /// Commands carried by those pipelines
    pub commands_executed: u64,
    /// Pipelines that failed or timed out
    pub pipeline_failures: u64,
    /// Average pipeline latency in microseconds
    pub average_latency_us: f64,
}

/// Redis connection pool
pub struct RedisPool {
    client: Client,

    /// The multiplexed connection (Redis handles multiplexing internally)
    connection: RwLock<Option<MultiplexedConnection>>,

    config: RedisConfig,

    metrics: Arc<PoolMetrics>,

    /// Bounds in-flight pipelines
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Create a pool and establish the initial connection
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| Error::Connection(safe_redis_error(&config.url, &e)))?;

        let semaphore = Arc::new(Semaphore::new(config.pool_size as usize));
        let pool = Self {
            client,
            connection: RwLock::new(None),
            config,
            metrics: Arc::new(PoolMetrics::default()),
            semaphore,
        };

        pool.connect().await?;

        info!("Connected to Redis at {}", sanitize_url(&pool.config.url));
        Ok(pool)
    }

    /// Establish or re-establish the connection
    async fn connect(&self) -> Result<MultiplexedConnection> {
        let start = Instant::now();

        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            self.metrics.record_connection_failure();
            Error::Connection(format!(
                "Connection to {} timed out after {:?}",
                sanitize_url(&self.config.url),
                self.config.connection_timeout
            ))
        })?
        .map_err(|e| {
            self.metrics.record_connection_failure();
            Error::Connection(safe_redis_error(&self.config.url, &e))
        })?;

        *self.connection.write().await = Some(conn.clone());
        self.metrics.record_connection();

        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(conn)
    }

    /// Current connection, reconnecting if the last one was dropped
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let existing = self.connection.read().await.clone();
        match existing {
            Some(conn) => Ok(conn),
            None => self.connect().await,
        }
    }

    /// Run `f` once against a connection, bounded by the command timeout
    ///
    /// `commands` is the number of commands `f` sends and only feeds the
    /// metrics.
    pub async fn execute<F, Fut, T>(&self, commands: usize, f: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Connection("Connection pool closed".to_string()))?;

        let conn = self.connection().await?;
        let start = Instant::now();

        match tokio::time::timeout(self.config.command_timeout, f(conn)).await {
            Ok(Ok(value)) => {
                self.metrics.record_pipeline(commands, start.elapsed());
                Ok(value)
            },
            Ok(Err(e)) => {
                self.metrics.record_pipeline_failure();
                if e.is_connection_dropped() || e.is_io_error() {
                    warn!("Redis connection lost, reconnecting on next use");
                    *self.connection.write().await = None;
                }
                Err(Error::Connection(safe_redis_error(&self.config.url, &e)))
            },
            Err(_) => {
                self.metrics.record_pipeline_failure();
                Err(Error::Connection(format!(
                    "Command timed out after {:?}",
                    self.config.command_timeout
                )))
            },
        }
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}
