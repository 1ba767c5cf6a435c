use std::time::Duration;

use crate::error::ConfigError;

/// Configuration of a [`KeyValueReader`](crate::reader::KeyValueReader).
#[derive(Debug, Clone)]
pub struct ReaderOption {
    pub(crate) threads: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) batch_size: usize,
    pub(crate) timeout: Duration,
    pub(crate) flush_interval: Option<Duration>,
    pub(crate) poll_interval: Duration,
    pub(crate) close_timeout: Duration,
}

impl Default for ReaderOption {
    fn default() -> Self {
        ReaderOption {
            threads: 1,
            queue_capacity: 10_000,
            batch_size: 50,
            timeout: Duration::from_secs(60),
            flush_interval: None,
            poll_interval: Duration::from_millis(100),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl ReaderOption {
    /// Number of workers fetching values in parallel.
    pub fn threads(self, threads: usize) -> Self {
        ReaderOption { threads, ..self }
    }

    /// Maximum number of fetched records buffered ahead of the consumer.
    pub fn queue_capacity(self, queue_capacity: usize) -> Self {
        ReaderOption {
            queue_capacity,
            ..self
        }
    }

    /// Number of keys a worker accumulates before fetching.
    pub fn batch_size(self, batch_size: usize) -> Self {
        ReaderOption { batch_size, ..self }
    }

    /// Upper bound of a single batch fetch.
    pub fn timeout(self, timeout: Duration) -> Self {
        ReaderOption { timeout, ..self }
    }

    /// Periodically fetch partially filled batches. Disabled by default.
    pub fn flush_interval(self, flush_interval: Duration) -> Self {
        ReaderOption {
            flush_interval: Some(flush_interval),
            ..self
        }
    }

    /// How long a single `read` poll waits on an empty queue before
    /// re-checking for end-of-stream.
    pub fn poll_interval(self, poll_interval: Duration) -> Self {
        ReaderOption {
            poll_interval,
            ..self
        }
    }

    /// How long `close` waits for workers to drain before detaching them.
    pub fn close_timeout(self, close_timeout: Duration) -> Self {
        ReaderOption {
            close_timeout,
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Zero("threads"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if matches!(self.flush_interval, Some(interval) if interval.is_zero()) {
            return Err(ConfigError::ZeroDuration("flush_interval"));
        }
        Ok(())
    }
}

/// Configuration of a [`ScanKeySource`](crate::source::scan::ScanKeySource).
#[derive(Debug, Clone)]
pub struct ScanOption {
    pub(crate) count: usize,
    pub(crate) pattern: Option<String>,
}

impl Default for ScanOption {
    fn default() -> Self {
        ScanOption {
            count: 1000,
            pattern: None,
        }
    }
}

impl ScanOption {
    /// Number of keys hinted to each scan call.
    pub fn count(self, count: usize) -> Self {
        ScanOption { count, ..self }
    }

    /// Only enumerate keys matching this glob-style pattern.
    pub fn pattern(self, pattern: impl Into<String>) -> Self {
        ScanOption {
            pattern: Some(pattern.into()),
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::Zero("count"));
        }
        Ok(())
    }
}
