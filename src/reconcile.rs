//! Result Reconciler
//!
//! Turns the replies of a pipelined batch back into one ordered [`Samples`]
//! sequence. Replies are matched to sub-queries purely by position, so a
//! reply count that differs from the plan is a protocol error rather than
//! something to guess around.
//!
//! For calendar plans, every bucket is represented in the output when the
//! request asked for empty buckets: a bucket whose sub-queries returned no
//! rows gets a single NaN sample at its start. Per-command failures are kept
//! in-band as error samples at the sub-query's start.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::RawReply;
use crate::planner::{QueryPlan, SubQuery};
use crate::types::{Sample, Samples};

/// Reconcile batch replies against the plan that produced them
pub fn reconcile(plan: &QueryPlan, replies: Vec<RawReply>) -> Result<Samples> {
    if replies.len() != plan.len() {
        return Err(Error::Protocol(format!(
            "expected {} replies for the batch, got {}",
            plan.len(),
            replies.len()
        )));
    }

    let mut samples = match &plan.boundaries {
        Some(boundaries) => {
            let mut per_bucket: Vec<Vec<Sample>> = vec![Vec::new(); boundaries.len()];
            let mut answered = vec![false; boundaries.len()];

            for (query, reply) in plan.sub_queries.iter().zip(replies) {
                let index = query.bucket.ok_or_else(|| {
                    Error::Protocol("calendar sub-query without a bucket".to_string())
                })?;
                let slot = per_bucket.get_mut(index).ok_or_else(|| {
                    Error::Protocol(format!("sub-query refers to missing bucket {}", index))
                })?;
                let fallback = boundaries[index].start;
                let before = slot.len();
                append_reply(slot, query, reply, fallback);
                answered[index] |= slot.len() > before;
            }

            let mut out = Vec::new();
            for ((bucket, rows), answered) in boundaries.iter().zip(per_bucket).zip(answered) {
                if !answered && plan.include_empty {
                    out.push(Sample::missing(bucket.start));
                } else {
                    out.extend(rows);
                }
            }
            out
        }
        None => {
            let mut out = Vec::new();
            for (query, reply) in plan.sub_queries.iter().zip(replies) {
                let fallback = query.command.start_ts().unwrap_or(0);
                append_reply(&mut out, query, reply, fallback);
            }
            out
        }
    };

    if plan.reverse {
        samples.reverse();
    }

    debug!("Reconciled {} samples from {} replies", samples.len(), plan.len());
    Ok(Samples::from_vec(samples))
}

/// Append one reply's rows in ascending order
fn append_reply(out: &mut Vec<Sample>, query: &SubQuery, reply: RawReply, fallback_ts: i64) {
    match reply {
        Ok(rows) => {
            let start = out.len();
            out.extend(rows.into_iter().map(|(ts, value)| Sample::new(ts, value)));
            if query.command.reverse {
                out[start..].reverse();
            }
        }
        Err(message) => {
            warn!(
                "{} on {} failed: {}",
                query.command.name(),
                query.command.key,
                message
            );
            out.push(Sample::error(fallback_ts, message));
        }
    }
}
