use crate::batch::BatchResult;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Executor was closed: {0}")]
    ExecutorClosed(String),

    #[error("Couldn't get a lock in {timeout:?} for the key {key} at the cache {cache}")]
    CacheTimeout {
        cache: String,
        key: String,
        timeout: Duration,
    },

    #[error("Got interrupted while trying to acquire lock for key {key} at the cache {cache}")]
    CacheInterrupted { cache: String, key: String },

    #[error("{0}")]
    BatchFailure(Box<BatchFailure>),

    #[error(
        "Caching stored procedures with OUT params is not supported. \
         Please configure use_cache=false in {0} statement."
    )]
    CachingUnsupported(String),

    #[error("Re-entrant query for key {0} while its result is still being computed")]
    ReentrantQuery(String),

    #[error("Mapped statement not found: {0}")]
    StatementNotFound(String),

    #[error("Statement {statement} returned {found} rows where at most one was expected")]
    TooManyResults { statement: String, found: usize },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl QueryError {
    /// Shorthand for the error raised by any operation on a closed executor.
    pub fn closed(activity: impl Into<String>) -> Self {
        QueryError::ExecutorClosed(activity.into())
    }
}

/// A batch that failed part-way through a flush.
///
/// `successful` holds the sub-batches that executed before the failure; the
/// caller is expected to roll them back together with the failed one.
#[derive(Debug)]
pub struct BatchFailure {
    pub message: String,
    /// Id of the statement whose batch failed.
    pub statement_id: String,
    /// 1-based position of the failing sub-batch within the flush.
    pub batch_index: usize,
    pub successful: Vec<BatchResult>,
    pub failed: BatchResult,
    pub cause: Box<QueryError>,
}

impl BatchFailure {
    /// Number of sub-batches that completed before the failing one.
    pub fn successful_count(&self) -> usize {
        self.successful.len()
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Cause: {}", self.message, self.cause)
    }
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;
