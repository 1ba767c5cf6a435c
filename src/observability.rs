//! Logging infrastructure for kvpipe.
//!
//! kvpipe uses `tracing` for structured logging. All events use target
//! "kvpipe" and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! kvpipe never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (`reader`, `worker`, `source`, `fetch`, `pool`)
//! - `run`: ulid of the open/close cycle, when one is known
//! - Use `%` for Display, `?` for Debug formatting
//! - Never log keys or values at levels above debug

/// Target for all kvpipe log events.
pub(crate) const KVPIPE_TARGET: &str = "kvpipe";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "reader",
///     event = "reader_opened",
///     run = %run_id,
///     threads = option.threads,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::KVPIPE_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::KVPIPE_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::KVPIPE_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::KVPIPE_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
