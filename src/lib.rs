//! Kuba TSQuery - calendar-aware range queries for Redis TimeSeries
//!
//! Redis TimeSeries aggregates only over fixed-duration buckets. This
//! library plans calendar-aligned queries on top of it:
//! - Monthly buckets with the real length of each month
//! - Daily buckets that follow the wall clock across DST changes
//! - Timestamp and sub-range filters split into protocol-sized sub-queries
//! - One pipelined round trip per logical request
//! - NaN placeholders for empty buckets, in-band per-command errors
//! - Merging of several series with sum/avg/subtract/min/max reductions
//!
//! # Example
//!
//! ```rust
//! use kuba_tsquery::aggregation::{Aggregation, AggregationType};
//! use kuba_tsquery::calendar::CalendarUnit;
//! use kuba_tsquery::planner::QueryPlanner;
//! use kuba_tsquery::range::RangeRequest;
//!
//! let request = RangeRequest::new("energy:meter1")
//!     .between(1_704_067_200_000, 1_711_929_599_999)
//!     .aggregation(Aggregation::calendar(AggregationType::Sum, CalendarUnit::Month));
//!
//! let plan = QueryPlanner::new().plan(&request).unwrap();
//! assert_eq!(plan.len(), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregation;
pub mod calendar;
pub mod error;
pub mod types;

/// Caller-facing range requests and per-sub-query commands
pub mod range;

/// Decomposition of range requests into batched sub-queries
pub mod planner;

/// Batch execution seam for range commands
pub mod executor;

/// Mapping of batch replies back onto buckets
pub mod reconcile;

/// Merging and reduction of several sample sequences
pub mod merge;

/// Redis connection pool and pipelined range executor
pub mod redis;

/// Client context tying planner and executor together
pub mod client;

/// Configuration management with TOML support
pub mod config;

pub use client::TimeSeriesClient;
pub use error::{Error, Result};
pub use merge::{MergePolicy, Reduction};
pub use range::RangeRequest;
pub use types::{Sample, SampleValue, Samples, TimeRange};
