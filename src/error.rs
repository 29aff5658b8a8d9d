//! Error types for range planning, execution and aggregation

use thiserror::Error;

/// Main error type for the crate
///
/// Configuration-type errors (`Aggregation`, `Filter`, `InvalidRange`,
/// `Timezone`) are raised while building or planning a request, before any
/// network call is made. Per-row failures reported by the store are not
/// errors at this level: they travel in-band as
/// [`SampleValue::Error`](crate::types::SampleValue::Error).
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown aggregation type or unusable bucket specification
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Invalid timestamp, sub-range or value filter
    #[error("Filter error: {0}")]
    Filter(String),

    /// Range bounds are reversed or not concrete where they must be
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidRange {
        /// Start of the range (or a textual bound)
        start: String,
        /// End of the range (or a textual bound)
        end: String,
    },

    /// Timestamp outside the range calendar arithmetic can represent
    #[error("Timestamp {0} is outside the representable calendar range")]
    OutOfRange(i64),

    /// Unknown IANA timezone name
    #[error("Unknown timezone: {0}")]
    Timezone(String),

    /// A reduction was applied to samples that are not in merged form
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// Connection, pool or timeout failure talking to Redis
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reply shape did not match the issued commands
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration file or value problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidRange`] from anything displayable
    pub fn invalid_range(start: impl ToString, end: impl ToString) -> Self {
        Error::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Whether this error was raised before reaching the network
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Aggregation(_)
                | Error::Filter(_)
                | Error::InvalidRange { .. }
                | Error::OutOfRange(_)
                | Error::Timezone(_)
                | Error::Configuration(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
