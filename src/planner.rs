//! Query Planner - decomposes a logical range request into sub-queries
//!
//! The store aggregates only over fixed-duration buckets. A calendar
//! aggregation is therefore planned as one sub-query per calendar bucket,
//! each carrying that bucket's real length as its fixed duration. Row
//! filters multiply the sub-queries further:
//!
//! - a timestamp filter is split into chunks of at most
//!   [`MAX_FILTER_CHUNK`] values, one sub-query per chunk
//! - a sub-range filter issues one sub-query per sub-range wholly contained
//!   in the bucket, aligned to the bucket start
//!
//! # Planning Phases
//!
//! ```text
//! RangeRequest
//!     │
//!     ▼
//! ┌─────────────────┐
//! │ Bucket resolve  │  calendar::resolve (calendar units only)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Filter expand   │  sub-ranges, then timestamp chunks
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   QueryPlan     │  immutable RangeCommands, issuance order
//! └─────────────────┘
//! ```
//!
//! The whole plan is sent as one pipelined batch, so a logical request
//! costs a single round trip however many buckets it spans.

use chrono_tz::Tz;
use tracing::debug;

use crate::calendar::{self, BoundarySequence};
use crate::error::{Error, Result};
use crate::range::{Alignment, RangeCommand, RangeRequest};
use crate::types::{RangeBound, TimeRange};

/// Largest number of `FILTER_BY_TS` values the store accepts per call
pub const MAX_FILTER_CHUNK: usize = 128;

// ============================================================================
// Planner Configuration
// ============================================================================

/// Configuration for query planning
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Timezone calendar boundaries are computed in (default: UTC)
    pub timezone: Tz,

    /// Timestamp filter values per sub-query (default: 128, never above it)
    pub filter_chunk_size: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            filter_chunk_size: MAX_FILTER_CHUNK,
        }
    }
}

impl PlannerConfig {
    /// Reject chunk sizes the store would refuse
    pub fn validate(&self) -> Result<()> {
        if self.filter_chunk_size == 0 || self.filter_chunk_size > MAX_FILTER_CHUNK {
            return Err(Error::Configuration(format!(
                "filter_chunk_size must be between 1 and {}, got {}",
                MAX_FILTER_CHUNK, self.filter_chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Query Plan
// ============================================================================

/// One planned invocation and the bucket it feeds
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    /// Fully resolved command
    pub command: RangeCommand,

    /// Index into the plan's boundary sequence, for calendar plans
    pub bucket: Option<usize>,
}

/// Ordered sub-queries for one logical request
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Sub-queries in issuance order
    pub sub_queries: Vec<SubQuery>,

    /// Calendar buckets, when a calendar aggregation was requested
    pub boundaries: Option<BoundarySequence>,

    /// The request asked for descending order
    pub reverse: bool,

    /// The request asked for empty-bucket placeholders
    pub include_empty: bool,
}

impl QueryPlan {
    /// Commands in issuance order
    pub fn commands(&self) -> Vec<RangeCommand> {
        self.sub_queries.iter().map(|q| q.command.clone()).collect()
    }

    /// Number of sub-queries
    pub fn len(&self) -> usize {
        self.sub_queries.len()
    }

    /// True when nothing needs to be sent
    pub fn is_empty(&self) -> bool {
        self.sub_queries.is_empty()
    }

    /// Whether this plan uses calendar buckets
    pub fn is_bucketed(&self) -> bool {
        self.boundaries.is_some()
    }
}

// ============================================================================
// Query Planner
// ============================================================================

/// Turns [`RangeRequest`]s into [`QueryPlan`]s
///
/// ```rust
/// use kuba_tsquery::planner::QueryPlanner;
/// use kuba_tsquery::range::RangeRequest;
///
/// let planner = QueryPlanner::new();
/// let request = RangeRequest::new("temp:1").filter_by_ts(0..300);
/// let plan = planner.plan(&request).unwrap();
///
/// let chunks: Vec<usize> = plan
///     .sub_queries
///     .iter()
///     .map(|q| q.command.filter_by_ts.as_ref().map_or(0, |ts| ts.len()))
///     .collect();
/// assert_eq!(chunks, vec![128, 128, 44]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    config: PlannerConfig,
}

impl QueryPlanner {
    /// Planner in UTC with the protocol chunk size
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner with custom configuration
    pub fn with_config(config: PlannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Planner computing calendar boundaries in `timezone`
    pub fn with_timezone(timezone: Tz) -> Self {
        Self {
            config: PlannerConfig {
                timezone,
                ..PlannerConfig::default()
            },
        }
    }

    /// Active configuration
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a request
    ///
    /// Validation happens here, so every configuration error surfaces
    /// before anything is sent to the store. The request itself is only
    /// read; each sub-query is an independent copy.
    pub fn plan(&self, request: &RangeRequest) -> Result<QueryPlan> {
        request.validate()?;

        let mut sub_queries = Vec::new();
        let boundaries = match (request.calendar_unit(), request.concrete_range()) {
            (Some(unit), Some(range)) => {
                let boundaries = calendar::resolve(range, unit, self.config.timezone)?;
                debug!(
                    "Resolved {} {} buckets for {} over {}",
                    boundaries.len(),
                    unit,
                    request.key,
                    range
                );

                for (index, bucket) in boundaries.iter().enumerate() {
                    let mut base = request.base_command();
                    base.start = RangeBound::At(bucket.start);
                    base.end = RangeBound::At(bucket.end);
                    base.aggregation = base
                        .aggregation
                        .map(|(kind, _)| (kind, bucket.span_ms()));

                    self.expand(request, base, bucket.range(), Some(index), &mut sub_queries);
                }
                Some(boundaries)
            }
            (Some(_), None) => {
                return Err(Error::invalid_range(
                    request.start.to_arg(),
                    request.end.to_arg(),
                ))
            }
            (None, _) => {
                let outer = TimeRange {
                    start: request.start.timestamp().unwrap_or(i64::MIN),
                    end: request.end.timestamp().unwrap_or(i64::MAX),
                };
                self.expand(request, request.base_command(), outer, None, &mut sub_queries);
                None
            }
        };

        for query in &sub_queries {
            debug!("Planned {} {}", query.command.name(), query.command.args().join(" "));
        }

        Ok(QueryPlan {
            sub_queries,
            boundaries,
            reverse: request.reverse,
            include_empty: request.include_empty,
        })
    }

    /// Apply sub-range and timestamp filters to one bucket's base command
    fn expand(
        &self,
        request: &RangeRequest,
        base: RangeCommand,
        bucket: TimeRange,
        index: Option<usize>,
        out: &mut Vec<SubQuery>,
    ) {
        if request.filter_by_ranges.is_empty() {
            self.chunk_timestamps(request, base, bucket, index, out);
            return;
        }

        let align = match base.start {
            RangeBound::At(start) => Alignment::At(start),
            _ => Alignment::Start,
        };

        for range in request
            .filter_by_ranges
            .iter()
            .filter(|r| bucket.contains_range(r))
        {
            let mut narrowed = base.clone();
            narrowed.start = RangeBound::At(range.start);
            narrowed.end = RangeBound::At(range.end);
            narrowed.align = align;
            self.chunk_timestamps(request, narrowed, *range, index, out);
        }
    }

    /// Attach the timestamp filter in protocol-sized chunks
    ///
    /// Calendar buckets only receive the timestamps that fall inside them;
    /// a bucket left with none issues no sub-query.
    fn chunk_timestamps(
        &self,
        request: &RangeRequest,
        command: RangeCommand,
        window: TimeRange,
        index: Option<usize>,
        out: &mut Vec<SubQuery>,
    ) {
        let Some(timestamps) = &request.filter_by_ts else {
            out.push(SubQuery {
                command,
                bucket: index,
            });
            return;
        };

        let selected: Vec<i64> = if index.is_some() {
            timestamps
                .iter()
                .copied()
                .filter(|ts| window.contains(*ts))
                .collect()
        } else {
            timestamps.clone()
        };

        for chunk in selected.chunks(self.config.filter_chunk_size) {
            let mut chunked = command.clone();
            chunked.filter_by_ts = Some(chunk.to_vec());
            out.push(SubQuery {
                command: chunked,
                bucket: index,
            });
        }
    }
}
