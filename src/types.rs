//! Core data types shared by the planner, reconciler and merge engine
//!
//! # Key Types
//!
//! - **`Sample`**: A single timestamped value returned by a range query
//! - **`SampleValue`**: Tagged value of a sample (single, merged list, or in-band error)
//! - **`Samples`**: An ordered sample sequence with optional label metadata
//! - **`TimeRange`**: Inclusive time window in milliseconds
//! - **`RangeBound`**: A range endpoint that may be open-ended (`-` / `+`)
//!
//! # Example
//!
//! ```rust
//! use kuba_tsquery::types::{Sample, Samples, TimeRange};
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1500));
//!
//! let samples: Samples = vec![Sample::new(1000, 1.5), Sample::new(2000, 2.5)]
//!     .into_iter()
//!     .collect();
//! assert_eq!(samples.to_pairs(), vec![(1000, Some(1.5)), (2000, Some(2.5))]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};

/// Time window for queries, both ends inclusive, in milliseconds
///
/// ```rust
/// use kuba_tsquery::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
/// assert!(range.contains(1000));
/// assert!(range.contains(2000));
/// assert!(!range.contains(2001));
/// assert_eq!(range.span_ms(), 1001);
///
/// assert!(TimeRange::new(2000, 1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_range(start, end));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Check if `other` lies wholly inside this range
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Number of milliseconds covered, counting both endpoints
    pub fn span_ms(&self) -> i64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// One endpoint of a range query
///
/// Redis accepts `-` and `+` for the earliest and latest sample of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeBound {
    /// Earliest sample in the series (`-`)
    Earliest,
    /// Latest sample in the series (`+`)
    Latest,
    /// Concrete timestamp in milliseconds
    At(i64),
}

impl RangeBound {
    /// The concrete timestamp, if any
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            RangeBound::At(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Render as a command argument
    pub fn to_arg(&self) -> String {
        match self {
            RangeBound::Earliest => "-".to_string(),
            RangeBound::Latest => "+".to_string(),
            RangeBound::At(ts) => ts.to_string(),
        }
    }
}

impl From<i64> for RangeBound {
    fn from(ts: i64) -> Self {
        RangeBound::At(ts)
    }
}

/// Value carried by a [`Sample`]
///
/// `Single` is what the store returns. `List` is produced by
/// [`Samples::merge`] and holds one entry per contributing series until a
/// reduction collapses it. `Error` is a per-row failure reported by the store
/// and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    /// Scalar value (NaN marks a missing bucket)
    Single(f64),
    /// Merged values, one per contributing series
    List(Vec<f64>),
    /// In-band error reported by the store for this row
    Error(String),
}

impl SampleValue {
    /// Scalar value, if this is a single value
    pub fn as_single(&self) -> Option<f64> {
        match self {
            SampleValue::Single(v) => Some(*v),
            _ => None,
        }
    }

    /// Merged values, if this is a list
    pub fn as_list(&self) -> Option<&[f64]> {
        match self {
            SampleValue::List(values) => Some(values),
            _ => None,
        }
    }

    /// Whether this value is an in-band error marker
    pub fn is_error(&self) -> bool {
        matches!(self, SampleValue::Error(_))
    }

    /// Whether this is a single NaN value
    pub fn is_nan(&self) -> bool {
        matches!(self, SampleValue::Single(v) if v.is_nan())
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        SampleValue::Single(value)
    }
}

impl From<Vec<f64>> for SampleValue {
    fn from(values: Vec<f64>) -> Self {
        SampleValue::List(values)
    }
}

/// A single data point of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Sample value
    pub value: SampleValue,
}

impl Sample {
    /// Create a scalar sample
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value: SampleValue::Single(value),
        }
    }

    /// Create a missing-data placeholder (NaN value)
    pub fn missing(timestamp: i64) -> Self {
        Self::new(timestamp, f64::NAN)
    }

    /// Create a merged sample from per-series values
    pub fn calculated(timestamp: i64, values: Vec<f64>) -> Self {
        Self {
            timestamp,
            value: SampleValue::List(values),
        }
    }

    /// Create an in-band error marker
    pub fn error(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: SampleValue::Error(message.into()),
        }
    }

    /// Whether the value is a merged list awaiting reduction
    pub fn is_calculated(&self) -> bool {
        matches!(self.value, SampleValue::List(_))
    }
}

/// Ordered sequence of samples
///
/// Dereferences to `[Sample]` so it can be indexed and iterated like a
/// slice. Mutating operations live in [`crate::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Samples {
    samples: Vec<Sample>,

    /// Series labels carried along with the samples
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Samples {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing vector of samples
    pub fn from_vec(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach label metadata
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Append a sample
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Consume the sequence, returning the samples
    pub fn into_vec(self) -> Vec<Sample> {
        self.samples
    }

    /// True if any element is an in-band error marker
    pub fn has_errors(&self) -> bool {
        self.samples.iter().any(|s| s.value.is_error())
    }

    /// All in-band error markers as `(timestamp, message)`
    pub fn errors(&self) -> Vec<(i64, &str)> {
        self.samples
            .iter()
            .filter_map(|s| match &s.value {
                SampleValue::Error(msg) => Some((s.timestamp, msg.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Timestamps in sequence order
    pub fn timestamps(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    /// `(timestamp, value)` pairs for scalar samples; non-scalar values map to `None`
    pub fn to_pairs(&self) -> Vec<(i64, Option<f64>)> {
        self.samples
            .iter()
            .map(|s| (s.timestamp, s.value.as_single()))
            .collect()
    }

    /// Map keyed by timestamp; later samples overwrite earlier ones
    pub fn to_map(&self) -> BTreeMap<i64, SampleValue> {
        self.samples
            .iter()
            .map(|s| (s.timestamp, s.value.clone()))
            .collect()
    }

    /// Scalar values in order, skipping non-scalar samples
    pub fn values(&self) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.value.as_single())
            .collect()
    }
}

impl Deref for Samples {
    type Target = [Sample];

    fn deref(&self) -> &Self::Target {
        &self.samples
    }
}

impl DerefMut for Samples {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.samples
    }
}

impl FromIterator<Sample> for Samples {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl IntoIterator for Samples {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Samples {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl From<Vec<Sample>> for Samples {
    fn from(samples: Vec<Sample>) -> Self {
        Self::from_vec(samples)
    }
}
