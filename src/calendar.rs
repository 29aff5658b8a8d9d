//! Calendar bucket resolution
//!
//! Splits an inclusive time range into buckets whose boundaries follow the
//! wall clock of a timezone: the first instant of each calendar month, or
//! the same local time on the next calendar day. Because boundaries are
//! computed in local time, a day bucket that crosses a daylight-saving
//! transition is 23 or 25 hours long instead of being cut at the transition,
//! and month buckets carry the true length of each month.
//!
//! The first bucket always starts at the range start and the last bucket
//! always ends at the range end; interior buckets end one millisecond before
//! the next boundary, so consecutive buckets never overlap or leave gaps.
//!
//! ```rust
//! use kuba_tsquery::calendar::{resolve, CalendarUnit};
//! use kuba_tsquery::types::TimeRange;
//!
//! // 2024-01-01T00:00:00Z .. 2024-03-31T23:59:59.999Z
//! let range = TimeRange::new(1_704_067_200_000, 1_711_929_599_999).unwrap();
//! let buckets = resolve(range, CalendarUnit::Month, chrono_tz::UTC).unwrap();
//!
//! assert_eq!(buckets.len(), 3);
//! assert_eq!(buckets[1].span_ms(), 29 * 86_400_000); // leap-year February
//! ```

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::TimeRange;

/// Step used to walk out of a nonexistent local time (DST gap)
const GAP_STEP_MINUTES: i64 = 15;

/// Longest gap we are willing to walk through before giving up
const MAX_GAP_STEPS: i64 = 24 * 60 / GAP_STEP_MINUTES;

/// Calendar granularity for bucketing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarUnit {
    /// Calendar month in the configured timezone
    Month,
    /// Calendar day in the configured timezone (DST-aware)
    Day,
}

impl CalendarUnit {
    /// Lowercase name of the unit
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarUnit::Month => "month",
            CalendarUnit::Day => "day",
        }
    }
}

impl FromStr for CalendarUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" => Ok(CalendarUnit::Month),
            "day" => Ok(CalendarUnit::Day),
            other => Err(Error::Aggregation(format!(
                "{} is not a calendar unit (expected month or day)",
                other
            ))),
        }
    }
}

impl fmt::Display for CalendarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One calendar bucket, both ends inclusive, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// First millisecond of the bucket
    pub start: i64,
    /// Last millisecond of the bucket
    pub end: i64,
}

impl Bucket {
    /// Milliseconds covered by the bucket
    ///
    /// This is the fixed duration handed to the store when aggregating the
    /// bucket, so each month or day aggregates over its real length.
    pub fn span_ms(&self) -> i64 {
        self.end - self.start + 1
    }

    /// The bucket as a [`TimeRange`]
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Whether `range` lies wholly inside the bucket
    pub fn contains_range(&self, range: &TimeRange) -> bool {
        self.range().contains_range(range)
    }
}

/// Ordered, gap-free, non-overlapping buckets covering a range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundarySequence {
    unit: CalendarUnit,
    buckets: Vec<Bucket>,
}

impl BoundarySequence {
    /// Calendar unit the sequence was resolved with
    pub fn unit(&self) -> CalendarUnit {
        self.unit
    }

    /// Bucket start timestamps in order
    pub fn starts(&self) -> Vec<i64> {
        self.buckets.iter().map(|b| b.start).collect()
    }
}

impl Deref for BoundarySequence {
    type Target = [Bucket];

    fn deref(&self) -> &Self::Target {
        &self.buckets
    }
}

/// Parse an IANA timezone name such as `Europe/Amsterdam`
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| Error::Timezone(name.to_string()))
}

/// Resolve `range` into calendar buckets in timezone `tz`
///
/// Always yields at least one bucket, even for a zero-length range.
pub fn resolve(range: TimeRange, unit: CalendarUnit, tz: Tz) -> Result<BoundarySequence> {
    if range.start > range.end {
        return Err(Error::invalid_range(range.start, range.end));
    }

    let mut buckets = Vec::new();
    let mut current = range.start;

    loop {
        let next = next_boundary(current, unit, &tz)?;
        if next <= current {
            return Err(Error::Timezone(format!(
                "{} produced a non-increasing {} boundary after {}",
                tz, unit, current
            )));
        }

        if next >= range.end {
            buckets.push(Bucket {
                start: current,
                end: range.end,
            });
            break;
        }

        buckets.push(Bucket {
            start: current,
            end: next - 1,
        });
        current = next;
    }

    Ok(BoundarySequence { unit, buckets })
}

/// First instant of the next bucket after `timestamp`
fn next_boundary(timestamp: i64, unit: CalendarUnit, tz: &Tz) -> Result<i64> {
    let local = to_utc(timestamp)?.with_timezone(tz);

    let naive = match unit {
        CalendarUnit::Month => {
            let (year, month) = if local.month() == 12 {
                (local.year() + 1, 1)
            } else {
                (local.year(), local.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or(Error::OutOfRange(timestamp))?
        },
        CalendarUnit::Day => local
            .naive_local()
            .checked_add_days(Days::new(1))
            .ok_or(Error::OutOfRange(timestamp))?,
    };

    Ok(resolve_local(tz, naive)?.timestamp_millis())
}

/// Map a wall-clock time to an instant
///
/// Ambiguous times (DST fall-back) take the earlier instant; nonexistent
/// times (DST spring-forward gap) move forward to the first valid time.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => return Ok(dt),
        LocalResult::Ambiguous(earliest, _) => return Ok(earliest),
        LocalResult::None => {},
    }

    for step in 1..=MAX_GAP_STEPS {
        let candidate = naive + chrono::Duration::minutes(step * GAP_STEP_MINUTES);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Ok(dt),
            LocalResult::Ambiguous(earliest, _) => return Ok(earliest),
            LocalResult::None => continue,
        }
    }

    Err(Error::Timezone(format!(
        "no valid local time near {} in {}",
        naive, tz
    )))
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp)
        .ok_or(Error::OutOfRange(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Amsterdam;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn utc_ms(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp_millis()
    }

    fn local_midnight(tz: Tz, y: i32, m: u32, d: u32) -> i64 {
        tz.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_single_month_has_true_length() {
        let range = TimeRange::new(utc_ms(2024, 2, 1), utc_ms(2024, 3, 1) - 1).unwrap();
        let buckets = resolve(range, CalendarUnit::Month, chrono_tz::UTC).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].span_ms(), 29 * DAY);
    }

    #[test]
    fn test_months_are_contiguous() {
        let range = TimeRange::new(utc_ms(2023, 11, 1), utc_ms(2024, 3, 1) - 1).unwrap();
        let buckets = resolve(range, CalendarUnit::Month, chrono_tz::UTC).unwrap();

        assert_eq!(
            buckets.starts(),
            vec![
                utc_ms(2023, 11, 1),
                utc_ms(2023, 12, 1),
                utc_ms(2024, 1, 1),
                utc_ms(2024, 2, 1)
            ]
        );
        for pair in buckets.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        assert_eq!(buckets[0].span_ms(), 30 * DAY);
        assert_eq!(buckets[1].span_ms(), 31 * DAY);
    }

    #[test]
    fn test_month_starting_mid_month() {
        let start = utc_ms(2024, 1, 15);
        let range = TimeRange::new(start, utc_ms(2024, 2, 10)).unwrap();
        let buckets = resolve(range, CalendarUnit::Month, chrono_tz::UTC).unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start, start);
        assert_eq!(buckets[0].end, utc_ms(2024, 2, 1) - 1);
        assert_eq!(buckets[1].end, utc_ms(2024, 2, 10));
    }

    #[test]
    fn test_end_on_boundary_does_not_add_bucket() {
        let range = TimeRange::new(utc_ms(2024, 1, 1), utc_ms(2024, 4, 1)).unwrap();
        let buckets = resolve(range, CalendarUnit::Month, chrono_tz::UTC).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[2].end, utc_ms(2024, 4, 1));
    }

    #[test]
    fn test_zero_length_range_yields_one_bucket() {
        let ts = utc_ms(2024, 5, 5);
        let range = TimeRange::new(ts, ts).unwrap();
        for unit in [CalendarUnit::Month, CalendarUnit::Day] {
            let buckets = resolve(range, unit, chrono_tz::UTC).unwrap();
            assert_eq!(buckets.len(), 1);
            assert_eq!(buckets[0], Bucket { start: ts, end: ts });
        }
    }

    #[test]
    fn test_month_boundaries_follow_timezone() {
        let start = local_midnight(Amsterdam, 2024, 1, 1);
        let end = local_midnight(Amsterdam, 2024, 4, 1) - 1;
        let buckets = resolve(TimeRange::new(start, end).unwrap(), CalendarUnit::Month, Amsterdam)
            .unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1].start, local_midnight(Amsterdam, 2024, 2, 1));
        // March loses an hour to the spring-forward transition
        assert_eq!(buckets[2].span_ms(), 31 * DAY - HOUR);
    }

    #[test]
    fn test_fall_back_day_is_25_hours() {
        let start = local_midnight(Amsterdam, 2024, 10, 25);
        let end = local_midnight(Amsterdam, 2024, 10, 30) - 1;
        let buckets =
            resolve(TimeRange::new(start, end).unwrap(), CalendarUnit::Day, Amsterdam).unwrap();

        let spans: Vec<i64> = buckets.iter().map(|b| b.span_ms() / HOUR).collect();
        assert_eq!(spans, vec![24, 24, 25, 24, 24]);
    }

    #[test]
    fn test_spring_forward_day_is_23_hours() {
        let start = local_midnight(Amsterdam, 2024, 3, 30);
        let end = local_midnight(Amsterdam, 2024, 4, 2) - 1;
        let buckets =
            resolve(TimeRange::new(start, end).unwrap(), CalendarUnit::Day, Amsterdam).unwrap();

        let spans: Vec<i64> = buckets.iter().map(|b| b.span_ms() / HOUR).collect();
        assert_eq!(spans, vec![24, 23, 24]);
        assert_eq!(buckets[2].start, local_midnight(Amsterdam, 2024, 4, 1));
    }

    #[test]
    fn test_gap_resolution_moves_forward() {
        // 02:30 does not exist in Amsterdam on 2024-03-31
        let naive = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolve_local(&Amsterdam, naive).unwrap();
        assert_eq!(resolved.naive_local().format("%H:%M").to_string(), "03:00");
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Europe/Amsterdam").unwrap(), Amsterdam);
        assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
        assert!(matches!(parse_timezone("Mars/Olympus"), Err(Error::Timezone(_))));
    }

    #[test]
    fn test_reversed_range_rejected() {
        let range = TimeRange { start: 10, end: 5 };
        assert!(resolve(range, CalendarUnit::Day, chrono_tz::UTC).is_err());
    }

    #[test]
    fn test_unrepresentable_timestamp() {
        let range = TimeRange::new(i64::MAX - 1, i64::MAX).unwrap();
        for unit in [CalendarUnit::Month, CalendarUnit::Day] {
            let err = resolve(range, unit, chrono_tz::UTC).unwrap_err();
            assert!(matches!(err, Error::OutOfRange(ts) if ts == i64::MAX - 1));
            assert!(err.to_string().contains("outside the representable calendar range"));
        }
    }
}
