//! Range query requests
//!
//! [`RangeRequest`] is the caller-facing description of a logical range
//! query: bounds, aggregation (fixed or calendar), optional row filters and
//! flags. The planner never mutates it; instead it derives one immutable
//! [`RangeCommand`] per sub-query, each of which maps one-to-one onto a
//! `TS.RANGE` / `TS.REVRANGE` invocation.
//!
//! ```rust
//! use kuba_tsquery::aggregation::{Aggregation, AggregationType};
//! use kuba_tsquery::calendar::CalendarUnit;
//! use kuba_tsquery::range::RangeRequest;
//!
//! let request = RangeRequest::new("energy:meter1")
//!     .between(1_704_067_200_000, 1_711_929_599_999)
//!     .aggregation(Aggregation::calendar(AggregationType::Sum, CalendarUnit::Month))
//!     .include_empty_buckets(true);
//!
//! assert!(request.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::aggregation::{Aggregation, AggregationType, BucketSpec};
use crate::error::{Error, Result};
use crate::types::{RangeBound, TimeRange};

/// Bucket alignment for aggregated queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alignment {
    /// Align buckets to the query start
    #[default]
    Start,
    /// Align buckets to the query end
    End,
    /// Align buckets to an explicit timestamp
    At(i64),
}

impl Alignment {
    /// Render as a command argument
    pub fn to_arg(&self) -> String {
        match self {
            Alignment::Start => "start".to_string(),
            Alignment::End => "end".to_string(),
            Alignment::At(ts) => ts.to_string(),
        }
    }
}

impl FromStr for Alignment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "-" => Ok(Alignment::Start),
            "end" | "+" => Ok(Alignment::End),
            other => other
                .parse::<i64>()
                .map(Alignment::At)
                .map_err(|_| Error::Configuration(format!("invalid alignment '{}'", s))),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arg())
    }
}

/// Logical range query as supplied by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRequest {
    /// Series key
    pub key: String,
    /// Range start
    pub start: RangeBound,
    /// Range end
    pub end: RangeBound,
    /// Restrict results to these timestamps (input order preserved)
    pub filter_by_ts: Option<Vec<i64>>,
    /// Restrict each bucket to the sub-ranges it wholly contains
    pub filter_by_ranges: Vec<TimeRange>,
    /// Restrict results to values within `[min, max]`
    pub filter_by_value: Option<(f64, f64)>,
    /// Aggregation, fixed or calendar
    pub aggregation: Option<Aggregation>,
    /// Maximum number of rows per sub-query
    pub count: Option<u64>,
    /// Bucket alignment
    pub align: Alignment,
    /// Emit placeholders for empty buckets
    pub include_empty: bool,
    /// Query in descending time order
    pub reverse: bool,
    /// Report the latest, possibly partial, compacted bucket
    pub latest: bool,
}

impl RangeRequest {
    /// New request over the whole series (`-` .. `+`)
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            start: RangeBound::Earliest,
            end: RangeBound::Latest,
            filter_by_ts: None,
            filter_by_ranges: Vec::new(),
            filter_by_value: None,
            aggregation: None,
            count: None,
            align: Alignment::Start,
            include_empty: true,
            reverse: false,
            latest: false,
        }
    }

    /// Set both bounds to concrete timestamps
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start = RangeBound::At(start);
        self.end = RangeBound::At(end);
        self
    }

    /// Set the start bound
    pub fn start(mut self, start: impl Into<RangeBound>) -> Self {
        self.start = start.into();
        self
    }

    /// Set the end bound
    pub fn end(mut self, end: impl Into<RangeBound>) -> Self {
        self.end = end.into();
        self
    }

    /// Set the aggregation
    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Restrict to explicit timestamps
    pub fn filter_by_ts(mut self, timestamps: impl IntoIterator<Item = i64>) -> Self {
        self.filter_by_ts = Some(timestamps.into_iter().collect());
        self
    }

    /// Restrict to sub-ranges (kept sorted by start)
    pub fn filter_by_ranges(mut self, ranges: impl IntoIterator<Item = TimeRange>) -> Self {
        let mut ranges: Vec<TimeRange> = ranges.into_iter().collect();
        ranges.sort();
        ranges.dedup();
        self.filter_by_ranges = ranges;
        self
    }

    /// Restrict to values within `[min, max]`
    pub fn filter_by_value(mut self, min: f64, max: f64) -> Self {
        self.filter_by_value = Some((min, max));
        self
    }

    /// Cap the number of rows per sub-query
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Set bucket alignment
    pub fn align(mut self, align: Alignment) -> Self {
        self.align = align;
        self
    }

    /// Request explicit placeholders for empty buckets
    pub fn include_empty_buckets(mut self, include: bool) -> Self {
        self.include_empty = include;
        self
    }

    /// Query in descending time order (`TS.REVRANGE`)
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Set the `LATEST` flag
    pub fn latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    /// Calendar unit requested, if any
    pub fn calendar_unit(&self) -> Option<crate::calendar::CalendarUnit> {
        self.aggregation.and_then(|a| a.bucket.calendar_unit())
    }

    /// Concrete outer range, if both bounds are timestamps
    pub fn concrete_range(&self) -> Option<TimeRange> {
        match (self.start.timestamp(), self.end.timestamp()) {
            (Some(start), Some(end)) => Some(TimeRange { start, end }),
            _ => None,
        }
    }

    /// Reject malformed requests before anything is sent
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Configuration("series key cannot be empty".to_string()));
        }

        if let (Some(start), Some(end)) = (self.start.timestamp(), self.end.timestamp()) {
            if start > end {
                return Err(Error::invalid_range(start, end));
            }
        }

        if let Some(aggregation) = &self.aggregation {
            aggregation.validate()?;
            if aggregation.bucket.calendar_unit().is_some() && self.concrete_range().is_none() {
                return Err(Error::invalid_range(
                    self.start.to_arg(),
                    self.end.to_arg(),
                ));
            }
        }

        if let Some(timestamps) = &self.filter_by_ts {
            if timestamps.is_empty() {
                return Err(Error::Filter("timestamp filter is empty".to_string()));
            }
        }

        for range in &self.filter_by_ranges {
            if range.start > range.end {
                return Err(Error::Filter(format!("sub-range {} is reversed", range)));
            }
        }

        if let Some((min, max)) = self.filter_by_value {
            if min.is_nan() || max.is_nan() || min > max {
                return Err(Error::Filter(format!(
                    "value filter [{}, {}] is not a valid interval",
                    min, max
                )));
            }
        }

        Ok(())
    }

    /// Base command with every option copied over and the aggregation
    /// resolved to `duration_ms` (ignored when there is no aggregation)
    pub(crate) fn base_command(&self) -> RangeCommand {
        let aggregation = self.aggregation.map(|a| match a.bucket {
            BucketSpec::Fixed(ms) => (a.kind, ms),
            // Replaced per bucket by the planner
            BucketSpec::Calendar(_) => (a.kind, 0),
        });

        RangeCommand {
            key: self.key.clone(),
            reverse: self.reverse,
            start: self.start,
            end: self.end,
            latest: self.latest,
            filter_by_ts: None,
            filter_by_value: self.filter_by_value,
            count: self.count,
            align: self.align,
            aggregation,
            empty: self.include_empty,
        }
    }
}

/// One fully resolved invocation of the store's range primitive
#[derive(Debug, Clone, PartialEq)]
pub struct RangeCommand {
    /// Series key
    pub key: String,
    /// `TS.REVRANGE` instead of `TS.RANGE`
    pub reverse: bool,
    /// Range start
    pub start: RangeBound,
    /// Range end
    pub end: RangeBound,
    /// `LATEST` flag
    pub latest: bool,
    /// `FILTER_BY_TS` values (at most one protocol chunk)
    pub filter_by_ts: Option<Vec<i64>>,
    /// `FILTER_BY_VALUE min max`
    pub filter_by_value: Option<(f64, f64)>,
    /// `COUNT n`
    pub count: Option<u64>,
    /// `ALIGN`, only emitted with an aggregation
    pub align: Alignment,
    /// Aggregation type and fixed bucket duration
    pub aggregation: Option<(AggregationType, i64)>,
    /// `EMPTY`, only emitted with an aggregation
    pub empty: bool,
}

impl RangeCommand {
    /// Command name
    pub fn name(&self) -> &'static str {
        if self.reverse {
            "TS.REVRANGE"
        } else {
            "TS.RANGE"
        }
    }

    /// Arguments following the command name, key first
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.key.clone(), self.start.to_arg(), self.end.to_arg()];

        if self.latest {
            args.push("LATEST".to_string());
        }

        if let Some(timestamps) = &self.filter_by_ts {
            args.push("FILTER_BY_TS".to_string());
            args.extend(timestamps.iter().map(|ts| ts.to_string()));
        }

        if let Some((min, max)) = self.filter_by_value {
            args.push("FILTER_BY_VALUE".to_string());
            args.push(min.to_string());
            args.push(max.to_string());
        }

        if let Some(count) = self.count {
            args.push("COUNT".to_string());
            args.push(count.to_string());
        }

        if let Some((kind, duration_ms)) = self.aggregation {
            args.push("ALIGN".to_string());
            args.push(self.align.to_arg());
            args.push("AGGREGATION".to_string());
            args.push(kind.as_str().to_string());
            args.push(duration_ms.to_string());
            if self.empty {
                args.push("EMPTY".to_string());
            }
        }

        args
    }

    /// Start timestamp of the command, when concrete
    pub fn start_ts(&self) -> Option<i64> {
        self.start.timestamp()
    }
}

impl fmt::Display for RangeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.args().join(" "))
    }
}
