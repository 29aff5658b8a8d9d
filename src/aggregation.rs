//! Aggregation specifications
//!
//! An aggregation pairs a reduction function understood by the store
//! (`avg`, `sum`, ...) with a bucket specification. The store itself only
//! understands fixed-duration buckets; calendar buckets are resolved into a
//! sequence of fixed-duration sub-queries by the [`crate::planner`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::calendar::CalendarUnit;
use crate::error::{Error, Result};

/// Nominal length of one month (365.2425 / 12 days) in milliseconds
pub const NOMINAL_MONTH_MS: i64 = 2_629_746_000;

/// Nominal length of one day in milliseconds
pub const NOMINAL_DAY_MS: i64 = 86_400_000;

/// Aggregation functions accepted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    /// Arithmetic mean
    Avg,
    /// Number of samples
    Count,
    /// First sample in the bucket
    First,
    /// Last sample in the bucket
    Last,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
    /// Max minus min
    Range,
    /// Population standard deviation
    StdP,
    /// Sample standard deviation
    StdS,
    /// Sum of values
    Sum,
    /// Population variance
    VarP,
    /// Sample variance
    VarS,
    /// Time-weighted average
    Twa,
}

impl AggregationType {
    /// All supported aggregation types
    pub const ALL: [AggregationType; 13] = [
        AggregationType::Avg,
        AggregationType::Count,
        AggregationType::First,
        AggregationType::Last,
        AggregationType::Max,
        AggregationType::Min,
        AggregationType::Range,
        AggregationType::StdP,
        AggregationType::StdS,
        AggregationType::Sum,
        AggregationType::VarP,
        AggregationType::VarS,
        AggregationType::Twa,
    ];

    /// Protocol name of the aggregation
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Avg => "avg",
            AggregationType::Count => "count",
            AggregationType::First => "first",
            AggregationType::Last => "last",
            AggregationType::Max => "max",
            AggregationType::Min => "min",
            AggregationType::Range => "range",
            AggregationType::StdP => "std.p",
            AggregationType::StdS => "std.s",
            AggregationType::Sum => "sum",
            AggregationType::VarP => "var.p",
            AggregationType::VarS => "var.s",
            AggregationType::Twa => "twa",
        }
    }
}

impl FromStr for AggregationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        AggregationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| Error::Aggregation(format!("{} is not a valid aggregation type", s)))
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the range is split into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketSpec {
    /// Fixed bucket duration in milliseconds, handled natively by the store
    Fixed(i64),
    /// Calendar-aligned buckets resolved client-side
    Calendar(CalendarUnit),
}

impl BucketSpec {
    /// Interpret a duration the way callers used to express calendar units
    ///
    /// The nominal month and day lengths select calendar bucketing; any other
    /// duration stays a plain fixed-duration bucket.
    pub fn from_nominal_ms(duration_ms: i64) -> Self {
        match duration_ms {
            NOMINAL_MONTH_MS => BucketSpec::Calendar(CalendarUnit::Month),
            NOMINAL_DAY_MS => BucketSpec::Calendar(CalendarUnit::Day),
            other => BucketSpec::Fixed(other),
        }
    }

    /// The calendar unit, if calendar-aligned
    pub fn calendar_unit(&self) -> Option<CalendarUnit> {
        match self {
            BucketSpec::Calendar(unit) => Some(*unit),
            BucketSpec::Fixed(_) => None,
        }
    }
}

impl FromStr for BucketSpec {
    type Err = Error;

    /// Accepts `month`, `day`, or a positive number of milliseconds
    ///
    /// The nominal month and day durations parse as calendar buckets.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(unit) = trimmed.parse::<CalendarUnit>() {
            return Ok(BucketSpec::Calendar(unit));
        }
        match trimmed.parse::<i64>() {
            Ok(ms) if ms > 0 => Ok(BucketSpec::from_nominal_ms(ms)),
            _ => Err(Error::Aggregation(format!(
                "Couldn't parse '{}' into a bucket duration",
                s
            ))),
        }
    }
}

impl fmt::Display for BucketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketSpec::Fixed(ms) => write!(f, "{}", ms),
            BucketSpec::Calendar(unit) => write!(f, "{}", unit),
        }
    }
}

/// Aggregation function applied over buckets
///
/// ```rust
/// use kuba_tsquery::aggregation::{Aggregation, AggregationType, BucketSpec};
/// use kuba_tsquery::calendar::CalendarUnit;
///
/// let agg = Aggregation::parse("AVG", "60000").unwrap();
/// assert_eq!(agg.kind, AggregationType::Avg);
/// assert_eq!(agg.to_string(), "AGGREGATION avg 60000");
///
/// let monthly = Aggregation::calendar(AggregationType::Sum, CalendarUnit::Month);
/// assert_eq!(monthly.bucket, BucketSpec::Calendar(CalendarUnit::Month));
///
/// assert!(Aggregation::parse("foo", "60000").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregation {
    /// Reduction applied within each bucket
    pub kind: AggregationType,
    /// Bucket specification
    pub bucket: BucketSpec,
}

impl Aggregation {
    /// Fixed-duration aggregation, validating the duration
    pub fn fixed(kind: AggregationType, duration_ms: i64) -> Result<Self> {
        let aggregation = Self {
            kind,
            bucket: BucketSpec::Fixed(duration_ms),
        };
        aggregation.validate()?;
        Ok(aggregation)
    }

    /// Calendar-aligned aggregation
    pub fn calendar(kind: AggregationType, unit: CalendarUnit) -> Self {
        Self {
            kind,
            bucket: BucketSpec::Calendar(unit),
        }
    }

    /// Parse a type name and bucket string such as `("avg", "month")`
    pub fn parse(kind: &str, bucket: &str) -> Result<Self> {
        let aggregation = Self {
            kind: kind.parse()?,
            bucket: bucket.parse()?,
        };
        aggregation.validate()?;
        Ok(aggregation)
    }

    /// Reject non-positive fixed durations
    pub fn validate(&self) -> Result<()> {
        if let BucketSpec::Fixed(ms) = self.bucket {
            if ms <= 0 {
                return Err(Error::Aggregation(format!(
                    "bucket duration must be positive, got {}",
                    ms
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AGGREGATION {} {}", self.kind, self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types_case_insensitive() {
        assert_eq!("avg".parse::<AggregationType>().unwrap(), AggregationType::Avg);
        assert_eq!("STD.P".parse::<AggregationType>().unwrap(), AggregationType::StdP);
        assert_eq!("Var.s".parse::<AggregationType>().unwrap(), AggregationType::VarS);
        assert!("median".parse::<AggregationType>().is_err());
    }

    #[test]
    fn test_every_type_round_trips_through_name() {
        for kind in AggregationType::ALL {
            assert_eq!(kind.as_str().parse::<AggregationType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_bucket_spec_parse() {
        assert_eq!(
            "month".parse::<BucketSpec>().unwrap(),
            BucketSpec::Calendar(CalendarUnit::Month)
        );
        assert_eq!(
            "Day".parse::<BucketSpec>().unwrap(),
            BucketSpec::Calendar(CalendarUnit::Day)
        );
        assert_eq!("60000".parse::<BucketSpec>().unwrap(), BucketSpec::Fixed(60000));
        assert!("week".parse::<BucketSpec>().is_err());
        assert!("0".parse::<BucketSpec>().is_err());
        assert!("-5".parse::<BucketSpec>().is_err());
    }

    #[test]
    fn test_nominal_durations() {
        assert_eq!(
            BucketSpec::from_nominal_ms(NOMINAL_MONTH_MS),
            BucketSpec::Calendar(CalendarUnit::Month)
        );
        assert_eq!(
            BucketSpec::from_nominal_ms(NOMINAL_DAY_MS),
            BucketSpec::Calendar(CalendarUnit::Day)
        );
        assert_eq!(BucketSpec::from_nominal_ms(3_600_000), BucketSpec::Fixed(3_600_000));

        let monthly = Aggregation::parse("sum", "2629746000").unwrap();
        assert_eq!(monthly.bucket, BucketSpec::Calendar(CalendarUnit::Month));
        assert_eq!(
            "86400000".parse::<BucketSpec>().unwrap(),
            BucketSpec::Calendar(CalendarUnit::Day)
        );
    }

    #[test]
    fn test_fixed_validation() {
        assert!(Aggregation::fixed(AggregationType::Sum, 0).is_err());
        assert!(Aggregation::fixed(AggregationType::Sum, -1).is_err());
        let agg = Aggregation::fixed(AggregationType::Sum, 1000).unwrap();
        assert_eq!(agg.to_string(), "AGGREGATION sum 1000");
    }

    #[test]
    fn test_display() {
        let agg = Aggregation::calendar(AggregationType::Max, CalendarUnit::Day);
        assert_eq!(agg.to_string(), "AGGREGATION max day");
    }

    #[test]
    fn test_equality() {
        let a = Aggregation::parse("max", "12345").unwrap();
        let b = Aggregation::fixed(AggregationType::Max, 12345).unwrap();
        let c = Aggregation::fixed(AggregationType::Min, 12345).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
