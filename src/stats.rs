//! Pipeline counters.
//!
//! Dropped batches are otherwise silent to the consumer, so they are counted
//! here alongside throughput.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of reader counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ReaderStatsSnapshot {
    /// Keys drawn from the key source by all workers.
    pub keys_drawn: u64,
    /// Records handed to the queue.
    pub records_published: u64,
    /// Batches fetched successfully.
    pub batches_fetched: u64,
    /// Batches discarded after a fetch error.
    pub batches_dropped: u64,
    /// Keys lost with discarded batches.
    pub keys_dropped: u64,
    /// Flushes that fetched a partial batch.
    pub flushes: u64,
    /// Flushes skipped because the worker was mid-fetch.
    pub flushes_skipped: u64,
    /// Workers that terminated on a connection failure or a panic.
    pub degraded_workers: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ReaderStats {
    keys_drawn: AtomicU64,
    records_published: AtomicU64,
    batches_fetched: AtomicU64,
    batches_dropped: AtomicU64,
    keys_dropped: AtomicU64,
    flushes: AtomicU64,
    flushes_skipped: AtomicU64,
    degraded_workers: AtomicU64,
}

impl ReaderStats {
    pub(crate) fn record_drawn(&self, keys: usize) {
        self.keys_drawn.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetched(&self) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, keys: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.keys_dropped.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_skipped(&self) {
        self.flushes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.degraded_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ReaderStatsSnapshot {
        ReaderStatsSnapshot {
            keys_drawn: self.keys_drawn.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            keys_dropped: self.keys_dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flushes_skipped: self.flushes_skipped.load(Ordering::Relaxed),
            degraded_workers: self.degraded_workers.load(Ordering::Relaxed),
        }
    }
}
