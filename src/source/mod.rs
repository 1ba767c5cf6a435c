//! Key enumeration.
//!
//! A [`KeySource`] hands out every key of a keyspace exactly once, no matter
//! how many workers draw from it concurrently. Two implementations ship with
//! the crate:
//!
//! - [`scan::ScanKeySource`] walks a finite keyspace with a cursor-based scan.
//! - [`live::LiveKeySource`] relays keys pushed by an external listener and
//!   only ends when every sender is gone.

use std::future::Future;

use crate::{error::SourceError, record::Key};

pub mod live;
pub mod scan;

pub use live::{KeySender, LiveKeySource};
pub use scan::{KeyPattern, KeyScanner, ScanKeySource, ScanPage};

/// Lazy, possibly infinite sequence of keys shared by all workers.
pub trait KeySource: Send + Sync + 'static {
    /// Begin enumeration. Calling it again on a started source does nothing.
    fn start(&self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Whether more keys may still be produced.
    ///
    /// Advisory only: another worker may drain the last keys between this
    /// call and the next `next`. An empty batch from `next` is the
    /// authoritative exhaustion signal.
    fn has_next(&self) -> bool;

    /// Return up to `n` keys no other caller has seen.
    ///
    /// Resolves to an empty batch once the keyspace is exhausted or the source
    /// was stopped.
    fn next(&self, n: usize) -> impl Future<Output = Result<Vec<Key>, SourceError>> + Send;

    /// Release cursor state. Pending and later `next` calls return empty.
    fn stop(&self) -> impl Future<Output = ()> + Send;
}
