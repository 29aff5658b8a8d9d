//! Multi-series aggregation
//!
//! [`Samples::merge`] combines independently fetched sequences into one
//! sequence keyed by exact timestamp, each sample holding a
//! [`SampleValue::List`] with one entry per contributing series. Reductions
//! then collapse every list back into a scalar, and scalar transforms adjust
//! values in place. All operations return the sequence so they chain:
//!
//! ```rust
//! use kuba_tsquery::merge::MergePolicy;
//! use kuba_tsquery::types::{Sample, Samples};
//!
//! let a = Samples::from_vec(vec![Sample::new(1, 3.0), Sample::new(2, 5.0)]);
//! let b = Samples::from_vec(vec![Sample::new(1, 4.0)]);
//!
//! let mut merged = Samples::merge(&[a, b], MergePolicy::KeepEqual);
//! merged.sum().unwrap().multiply(2.0).round(1);
//!
//! assert_eq!(merged.to_pairs(), vec![(1, Some(14.0))]);
//! ```
//!
//! Reductions require the merged form and fail with
//! [`Error::Calculation`] otherwise, including on a sequence that was
//! already reduced. Nothing here is synchronized; a sequence must not be
//! mutated from two threads at once.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Sample, SampleValue, Samples};

/// Decimal places beyond which rounding is a no-op
pub const MAX_ROUND_DECIMALS: u32 = 17;

// ============================================================================
// Policies
// ============================================================================

/// Which timestamps survive a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Every timestamp seen in any input
    #[default]
    KeepAll,
    /// Only timestamps present in every input
    KeepEqual,
    /// Only timestamps present in the first input
    KeepFirst,
}

impl MergePolicy {
    /// Policy name
    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::KeepAll => "keep_all",
            MergePolicy::KeepEqual => "keep_equal",
            MergePolicy::KeepFirst => "keep_first",
        }
    }
}

impl FromStr for MergePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_all" => Ok(MergePolicy::KeepAll),
            "keep_equal" => Ok(MergePolicy::KeepEqual),
            "keep_first" => Ok(MergePolicy::KeepFirst),
            _ => Err(Error::Configuration(format!("unknown merge policy '{}'", s))),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduction collapsing a merged value list into a scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Sum, NaN counted as zero
    Sum,
    /// Plain sum divided by the number of entries, NaN propagates
    Avg,
    /// First value minus the rest
    Subtract,
    /// Smallest non-NaN entry
    Min,
    /// Largest non-NaN entry
    Max,
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Reduction::Sum),
            "avg" | "average" => Ok(Reduction::Avg),
            "subtract" => Ok(Reduction::Subtract),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            _ => Err(Error::Configuration(format!("unknown reduction '{}'", s))),
        }
    }
}

// ============================================================================
// Merge
// ============================================================================

struct Slot {
    timestamp: i64,
    values: Vec<f64>,
    inputs: usize,
    last_input: usize,
}

impl Samples {
    /// Merge sequences by timestamp under `policy`
    ///
    /// Timestamps keep the order they were first seen in, so merging
    /// descending inputs gives a descending result. Only scalar samples take
    /// part; in-band error markers and already merged values are skipped.
    /// Each input contributes at most one value per timestamp, the first it
    /// holds. Metadata is combined with keys from earlier inputs taking
    /// precedence.
    pub fn merge(inputs: &[Samples], policy: MergePolicy) -> Samples {
        let mut slots: Vec<Slot> = Vec::new();
        let mut index_of: HashMap<i64, usize> = HashMap::new();
        let mut metadata = BTreeMap::new();

        for (index, input) in inputs.iter().enumerate() {
            for (key, value) in &input.metadata {
                metadata.entry(key.clone()).or_insert_with(|| value.clone());
            }

            for sample in input.iter() {
                let value = match &sample.value {
                    SampleValue::Single(value) => *value,
                    SampleValue::Error(message) => {
                        warn!(
                            "Skipping error sample at {} in merge input {}: {}",
                            sample.timestamp, index, message
                        );
                        continue;
                    }
                    SampleValue::List(_) => {
                        warn!(
                            "Skipping merged sample at {} in merge input {}",
                            sample.timestamp, index
                        );
                        continue;
                    }
                };

                match index_of.get(&sample.timestamp).copied() {
                    Some(position) => {
                        let slot = &mut slots[position];
                        if slot.last_input == index {
                            debug!(
                                "Skipping repeated timestamp {} in merge input {}",
                                sample.timestamp, index
                            );
                            continue;
                        }
                        slot.values.push(value);
                        slot.inputs += 1;
                        slot.last_input = index;
                    }
                    None => {
                        if policy == MergePolicy::KeepFirst && index > 0 {
                            continue;
                        }
                        index_of.insert(sample.timestamp, slots.len());
                        slots.push(Slot {
                            timestamp: sample.timestamp,
                            values: vec![value],
                            inputs: 1,
                            last_input: index,
                        });
                    }
                }
            }
        }

        let required = inputs.len();
        slots
            .into_iter()
            .filter(|slot| policy != MergePolicy::KeepEqual || slot.inputs == required)
            .map(|slot| Sample::calculated(slot.timestamp, slot.values))
            .collect::<Samples>()
            .with_metadata(metadata)
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    /// Apply a reduction chosen at runtime
    pub fn reduce(&mut self, reduction: Reduction) -> Result<&mut Self> {
        match reduction {
            Reduction::Sum => self.sum(),
            Reduction::Avg => self.avg(),
            Reduction::Subtract => self.subtract(),
            Reduction::Min => self.min(),
            Reduction::Max => self.max(),
        }
    }

    /// Sum each merged list, treating NaN as zero
    pub fn sum(&mut self) -> Result<&mut Self> {
        self.collapse("sum", |values| Some(nan_as_zero_sum(values)))
    }

    /// Average each merged list over its entry count
    ///
    /// Unlike [`Samples::sum`], a NaN entry makes the average NaN.
    pub fn avg(&mut self) -> Result<&mut Self> {
        self.collapse("avg", |values| {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        })
    }

    /// Subtract the remaining entries from the first
    ///
    /// Folds from twice the first value and subtracts every entry including
    /// the first, so `[3, 4]` gives `2` and `[1, 2, 3]` gives `-3`.
    pub fn subtract(&mut self) -> Result<&mut Self> {
        self.collapse("subtract", |values| {
            let first = values.first().copied().unwrap_or(f64::NAN);
            Some(values.iter().fold(first * 2.0, |acc, v| acc - v))
        })
    }

    /// Smallest non-NaN entry; all-NaN lists are left as they are
    pub fn min(&mut self) -> Result<&mut Self> {
        self.collapse("min", |values| {
            values
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .reduce(f64::min)
        })
    }

    /// Largest non-NaN entry; all-NaN lists are left as they are
    pub fn max(&mut self) -> Result<&mut Self> {
        self.collapse("max", |values| {
            values
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .reduce(f64::max)
        })
    }

    /// Check every sample is merged, then replace lists where `f` yields a value
    fn collapse<F>(&mut self, name: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&[f64]) -> Option<f64>,
    {
        if let Some(sample) = self.iter().find(|s| !s.is_calculated()) {
            return Err(Error::Calculation(format!(
                "{} needs merged samples, found a scalar value at {}",
                name, sample.timestamp
            )));
        }

        for sample in self.iter_mut() {
            if let SampleValue::List(values) = &sample.value {
                if let Some(reduced) = f(values) {
                    sample.value = SampleValue::Single(reduced);
                }
            }
        }
        Ok(self)
    }

    // ========================================================================
    // Scalar transforms
    // ========================================================================

    /// Multiply every value by `factor`
    pub fn multiply(&mut self, factor: f64) -> &mut Self {
        self.map_values(|v| v * factor)
    }

    /// Divide every value by `divisor`
    pub fn divide(&mut self, divisor: f64) -> &mut Self {
        self.map_values(|v| v / divisor)
    }

    /// Round every value to `decimals` decimal places
    ///
    /// An f64 holds no digits past [`MAX_ROUND_DECIMALS`], so larger requests
    /// leave values unchanged.
    pub fn round(&mut self, decimals: u32) -> &mut Self {
        if decimals > MAX_ROUND_DECIMALS {
            return self;
        }
        let scale = 10f64.powi(decimals as i32);
        self.map_values(|v| {
            let scaled = v * scale;
            if scaled.is_finite() {
                scaled.round() / scale
            } else {
                v
            }
        })
    }

    /// Replace NaN values with `default`
    pub fn replace_nan(&mut self, default: f64) -> &mut Self {
        self.map_values(|v| if v.is_nan() { default } else { v })
    }

    /// Clamp negative values to zero
    pub fn clamp_negative(&mut self) -> &mut Self {
        self.map_values(|v| if v < 0.0 { 0.0 } else { v })
    }

    /// Flip the sign of every value
    pub fn negate(&mut self) -> &mut Self {
        self.map_values(|v| -v)
    }

    fn map_values<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(f64) -> f64,
    {
        for sample in self.iter_mut() {
            match &mut sample.value {
                SampleValue::Single(value) => *value = f(*value),
                SampleValue::List(values) => values.iter_mut().for_each(|v| *v = f(*v)),
                SampleValue::Error(_) => {}
            }
        }
        self
    }
}

fn nan_as_zero_sum(values: &[f64]) -> f64 {
    values
        .iter()
        .map(|v| if v.is_nan() { 0.0 } else { *v })
        .sum()
}
