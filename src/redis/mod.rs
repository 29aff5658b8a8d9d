//! Redis TimeSeries integration
//!
//! Connection handling and the production [`RangeExecutor`] that runs
//! planned sub-queries as pipelined `TS.RANGE` / `TS.REVRANGE` calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_tsquery::redis::{RedisConfig, RedisPool, RedisRangeExecutor};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(RedisPool::new(RedisConfig::default()).await?);
//! let executor = RedisRangeExecutor::new(pool);
//! # Ok(())
//! # }
//! ```
//!
//! [`RangeExecutor`]: crate::executor::RangeExecutor

pub mod connection;
pub mod range;
pub mod util;

pub use connection::{PoolMetricsSnapshot, RedisConfig, RedisPool};
pub use range::RedisRangeExecutor;
