//! Error types for the extraction pipeline.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// Failure while advancing a key source.
///
/// Enumeration errors are fatal for a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// `next` was called before `start`.
    #[error("key source not started")]
    NotStarted,
    /// The underlying scan failed while advancing its cursor.
    #[error("key scan failed at cursor {cursor:?}: {message}")]
    Scan {
        /// Cursor the failed scan was issued with.
        cursor: Option<String>,
        /// Description from the store.
        message: String,
    },
}

/// Failure to obtain a pooled connection.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No connection became available within the wait budget.
    #[error("connection pool exhausted after waiting {0:?}")]
    Exhausted(Duration),
    /// Every connection of the pool has been invalidated.
    #[error("connection pool closed")]
    Closed,
}

/// Failure to fetch the values of one key batch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The store did not answer within the per-fetch timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The store rejected or failed the batch; the connection is still usable.
    #[error("store error: {0}")]
    Store(String),
    /// The connection became unusable.
    #[error("connection failure: {0}")]
    Connection(String),
    /// No connection could be borrowed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl FetchError {
    /// Whether this failure means the worker can no longer reach the store.
    pub fn is_connection(&self) -> bool {
        matches!(self, FetchError::Connection(_) | FetchError::Pool(_))
    }
}

/// Invalid reader or source configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A count that must be at least one was zero.
    #[error("`{0}` must be at least 1")]
    Zero(&'static str),
    /// A duration that must be positive was zero.
    #[error("`{0}` must be a positive duration")]
    ZeroDuration(&'static str),
    /// A key pattern that does not compile.
    #[error("invalid key pattern `{pattern}`: {source}")]
    Pattern {
        /// The glob pattern as supplied.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// Error returned by [`KeyValueReader`](crate::reader::KeyValueReader).
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    /// `read` was called before `open`.
    #[error("reader is not open")]
    NotOpen,
    /// `read` was called after `close`.
    #[error("reader is closed")]
    Closed,
    /// Configuration rejected by `open`.
    #[error("invalid reader configuration: {0}")]
    Config(#[from] ConfigError),
    /// The key source failed; the stream is terminated.
    #[error("key enumeration failed: {0}")]
    Enumeration(Arc<SourceError>),
    /// Every worker lost its connection before the key source was exhausted.
    #[error("all {workers} workers terminated on connection failures before keys were exhausted")]
    WorkersFailed {
        /// Number of workers that terminated.
        workers: usize,
    },
}

impl From<SourceError> for ReaderError {
    fn from(err: SourceError) -> Self {
        ReaderError::Enumeration(Arc::new(err))
    }
}
