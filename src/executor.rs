//! Remote range primitive
//!
//! The planner and reconciler never talk to a connection directly. They go
//! through [`RangeExecutor`], which runs a batch of [`RangeCommand`]s in a
//! single round trip and hands back one reply per command, in issuance
//! order. [`crate::redis::RedisRangeExecutor`] is the production
//! implementation; tests substitute an in-memory one.

use async_trait::async_trait;

use crate::error::Result;
use crate::range::RangeCommand;

/// Rows returned by one command: `(timestamp, value)` pairs
pub type Rows = Vec<(i64, f64)>;

/// Outcome of one command inside a batch
///
/// `Err` carries the error text the store reported for that command alone;
/// the rest of the batch is unaffected.
pub type RawReply = std::result::Result<Rows, String>;

/// Executes batches of range commands
///
/// Implementations must return exactly one reply per command, in the order
/// the commands were given, and must not retry. Connection-level failures
/// are returned as `Err` for the whole batch.
#[async_trait]
pub trait RangeExecutor: Send + Sync {
    /// Run `commands` as one pipelined round trip
    async fn execute_batch(&self, commands: &[RangeCommand]) -> Result<Vec<RawReply>>;
}

#[async_trait]
impl<E: RangeExecutor + ?Sized> RangeExecutor for std::sync::Arc<E> {
    async fn execute_batch(&self, commands: &[RangeCommand]) -> Result<Vec<RawReply>> {
        (**self).execute_batch(commands).await
    }
}
