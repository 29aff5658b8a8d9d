//! Pipelined `TS.RANGE` / `TS.REVRANGE` execution
//!
//! All commands of a batch go out in one pipeline. Replies are read raw, so
//! one failing sub-query (an unknown key, a bad filter) comes back as an
//! in-band error for that position only, while the other replies are still
//! delivered.

use async_trait::async_trait;
use redis::aio::ConnectionLike;
use redis::Value;
use std::sync::Arc;
use tracing::debug;

use super::connection::RedisPool;
use super::util::server_error_message;
use crate::error::{Error, Result};
use crate::executor::{RangeExecutor, RawReply, Rows};
use crate::range::RangeCommand;

/// [`RangeExecutor`] backed by a [`RedisPool`]
#[derive(Clone)]
pub struct RedisRangeExecutor {
    pool: Arc<RedisPool>,
}

impl RedisRangeExecutor {
    /// Executor sharing `pool`
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }
}

#[async_trait]
impl RangeExecutor for RedisRangeExecutor {
    async fn execute_batch(&self, commands: &[RangeCommand]) -> Result<Vec<RawReply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for command in commands {
            pipe.cmd(command.name()).arg(command.args());
        }

        // query_async would fail the whole batch on the first server error
        let count = commands.len();
        let values = self
            .pool
            .execute(count, |mut conn| async move {
                conn.req_packed_commands(&pipe, 0, count).await
            })
            .await?;

        debug!("Pipeline of {} range commands completed", count);
        parse_replies(count, values)
    }
}

/// Match raw pipeline replies to the commands that produced them
pub(crate) fn parse_replies(expected: usize, values: Vec<Value>) -> Result<Vec<RawReply>> {
    if values.len() != expected {
        return Err(Error::Protocol(format!(
            "pipeline of {} commands returned {} replies",
            expected,
            values.len()
        )));
    }
    values.into_iter().map(parse_reply).collect()
}

/// Parse one command's reply, keeping server errors in-band
pub(crate) fn parse_reply(value: Value) -> Result<RawReply> {
    let value = match value.extract_error() {
        Ok(value) => value,
        Err(err) => return Ok(Err(server_error_message(&err))),
    };

    let rows = match value {
        Value::Array(rows) | Value::Set(rows) => rows,
        Value::Nil => return Ok(Ok(Vec::new())),
        other => {
            return Err(Error::Protocol(format!(
                "expected an array of rows, got {:?}",
                other
            )))
        },
    };

    rows.into_iter()
        .map(parse_row)
        .collect::<Result<Rows>>()
        .map(Ok)
}

fn parse_row(row: Value) -> Result<(i64, f64)> {
    let fields = match row {
        Value::Array(fields) => fields,
        other => return Err(Error::Protocol(format!("malformed row {:?}", other))),
    };

    match fields.as_slice() {
        [timestamp, value] => Ok((parse_timestamp(timestamp)?, parse_value(value)?)),
        _ => Err(Error::Protocol(format!(
            "expected [timestamp, value], got {} fields",
            fields.len()
        ))),
    }
}

fn parse_timestamp(value: &Value) -> Result<i64> {
    match value {
        Value::Int(ts) => Ok(*ts),
        Value::BulkString(bytes) => parse_text(bytes)?
            .parse::<i64>()
            .map_err(|e| Error::Protocol(format!("bad timestamp: {}", e))),
        other => Err(Error::Protocol(format!("bad timestamp {:?}", other))),
    }
}

fn parse_value(value: &Value) -> Result<f64> {
    match value {
        Value::Double(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        Value::SimpleString(text) => parse_float(text),
        Value::BulkString(bytes) => parse_float(parse_text(bytes)?),
        other => Err(Error::Protocol(format!("bad sample value {:?}", other))),
    }
}

fn parse_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Protocol(format!("non-UTF-8 reply: {}", e)))
}

fn parse_float(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| Error::Protocol(format!("bad sample value '{}': {}", text, e)))
}
