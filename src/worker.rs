//! Fetch-and-publish workers.
//!
//! A worker draws keys from the shared source into a pending batch, fetches
//! the batch once it is full and publishes the records one by one. The
//! pending batch doubles as the per-worker lock: whoever holds it (the main
//! loop or a flush) is the only one fetching for this worker.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_lock::Mutex;
use flume::Sender;
use futures_util::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    fetch::{StoreClient, ValueFetcher},
    observability::{log_debug, log_error, log_warn},
    pool::ConnectionPool,
    reader::RunState,
    record::{Key, KeyValue},
    source::KeySource,
};

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// The key source returned an empty batch and everything drawn was
    /// published.
    Exhausted,
    /// The pipeline was closed.
    Cancelled,
    /// The key source failed.
    EnumerationFailed,
    /// The store connection became unusable.
    ConnectionFailed,
    /// The worker task panicked.
    Panicked,
}

impl WorkerExit {
    /// Whether the worker ended without finishing the keys it drew.
    pub(crate) fn is_failure(self) -> bool {
        matches!(self, WorkerExit::ConnectionFailed | WorkerExit::Panicked)
    }
}

enum Stop {
    Cancelled,
    ConnectionLost,
}

/// Reports the worker's exit to the run, also when its task unwinds.
struct ExitGuard<'a> {
    worker: usize,
    run: &'a RunState,
    exit: Option<WorkerExit>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let exit = match self.exit {
            Some(exit) => exit,
            None if std::thread::panicking() => WorkerExit::Panicked,
            // task dropped without being polled to completion
            None => WorkerExit::Cancelled,
        };
        self.run.worker_exited(self.worker, exit);
    }
}

pub(crate) struct Worker<S, P, C> {
    id: usize,
    batch_size: usize,
    source: Arc<S>,
    fetcher: ValueFetcher<P, C>,
    queue: Sender<KeyValue>,
    pending: Mutex<Vec<Key>>,
    cancel: CancellationToken,
    connection_lost: AtomicBool,
    run: Arc<RunState>,
}

impl<S, P, C> Worker<S, P, C>
where
    S: KeySource,
    P: ConnectionPool,
    C: StoreClient<Connection = P::Connection>,
{
    pub(crate) fn new(
        id: usize,
        batch_size: usize,
        source: Arc<S>,
        fetcher: ValueFetcher<P, C>,
        queue: Sender<KeyValue>,
        run: Arc<RunState>,
    ) -> Self {
        Self {
            id,
            batch_size,
            source,
            fetcher,
            queue,
            pending: Mutex::new(Vec::with_capacity(batch_size)),
            cancel: run.cancel.child_token(),
            connection_lost: AtomicBool::new(false),
            run,
        }
    }

    /// Run the worker until the source is exhausted, the pipeline closes, or
    /// the worker can no longer reach the store.
    pub(crate) async fn run(self: Arc<Self>) -> WorkerExit {
        log_debug!(
            component = "worker",
            event = "worker_started",
            run = %self.run.run_id,
            worker = self.id,
        );
        let mut guard = ExitGuard {
            worker: self.id,
            run: &self.run,
            exit: None,
        };
        let exit = self.drive().await;
        if exit == WorkerExit::ConnectionFailed {
            self.drop_pending();
        }
        guard.exit = Some(exit);
        exit
    }

    /// Count keys drawn but never fetched because the worker stopped.
    fn drop_pending(&self) {
        let Some(mut pending) = self.pending.try_lock() else {
            return;
        };
        if !pending.is_empty() {
            self.run.stats.record_dropped(pending.len());
            pending.clear();
        }
    }

    async fn drive(&self) -> WorkerExit {
        loop {
            let want = {
                let pending = self.pending.lock().await;
                self.batch_size.saturating_sub(pending.len()).max(1)
            };
            let drawn = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled_exit(),
                drawn = self.source.next(want) => drawn,
            };
            let keys = match drawn {
                Ok(keys) => keys,
                Err(err) => {
                    self.run.fail(err);
                    return WorkerExit::EnumerationFailed;
                }
            };

            let mut pending = self.pending.lock().await;
            if keys.is_empty() {
                let rest = mem::take(&mut *pending);
                return match self.fetch_and_publish(rest).await {
                    Ok(()) => WorkerExit::Exhausted,
                    Err(stop) => self.stop_exit(stop),
                };
            }
            self.run.stats.record_drawn(keys.len());
            pending.extend(keys);
            if pending.len() >= self.batch_size {
                let batch = mem::take(&mut *pending);
                if let Err(stop) = self.fetch_and_publish(batch).await {
                    return self.stop_exit(stop);
                }
            }
        }
    }

    /// Fetch whatever is pending right now, even if the batch is not full.
    ///
    /// Skipped when the main loop is mid-fetch; a no-op without pending keys.
    pub(crate) async fn flush(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(mut pending) = self.pending.try_lock() else {
            self.run.stats.record_flush_skipped();
            return;
        };
        if pending.is_empty() {
            return;
        }
        let batch = mem::take(&mut *pending);
        self.run.stats.record_flush();
        log_debug!(
            component = "worker",
            event = "flush",
            worker = self.id,
            keys = batch.len(),
        );
        if let Err(Stop::ConnectionLost) = self.fetch_and_publish(batch).await {
            self.connection_lost.store(true, Ordering::Release);
            self.cancel.cancel();
        }
    }

    async fn fetch_and_publish(&self, batch: Vec<Key>) -> Result<(), Stop> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.fetcher.fetch(&batch).await {
            Ok(records) => {
                self.run.stats.record_fetched();
                for record in records {
                    self.publish(record).await?;
                }
                Ok(())
            }
            Err(err) if err.is_connection() => {
                log_error!(
                    component = "worker",
                    event = "connection_lost",
                    run = %self.run.run_id,
                    worker = self.id,
                    keys = batch.len(),
                    error = %err,
                );
                self.run.stats.record_dropped(batch.len());
                Err(Stop::ConnectionLost)
            }
            Err(err) => {
                log_warn!(
                    component = "worker",
                    event = "batch_dropped",
                    run = %self.run.run_id,
                    worker = self.id,
                    keys = batch.len(),
                    error = %err,
                );
                self.run.stats.record_dropped(batch.len());
                Ok(())
            }
        }
    }

    async fn publish(&self, record: KeyValue) -> Result<(), Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            sent = self.queue.send_async(record) => match sent {
                Ok(()) => {
                    self.run.stats.record_published();
                    Ok(())
                }
                Err(_) => Err(Stop::Cancelled),
            },
        }
    }

    fn stop_exit(&self, stop: Stop) -> WorkerExit {
        match stop {
            Stop::ConnectionLost => {
                self.connection_lost.store(true, Ordering::Release);
                WorkerExit::ConnectionFailed
            }
            Stop::Cancelled => self.cancelled_exit(),
        }
    }

    fn cancelled_exit(&self) -> WorkerExit {
        if self.connection_lost.load(Ordering::Acquire) {
            WorkerExit::ConnectionFailed
        } else {
            WorkerExit::Cancelled
        }
    }
}

/// Flush every worker each `interval` until the run ends.
///
/// The first flush happens one interval after start. Workers are flushed in
/// turn; ticks missed while a flush is blocked are skipped, not queued.
pub(crate) async fn flush_periodically<S, P, C>(
    workers: Vec<Arc<Worker<S, P, C>>>,
    interval: Duration,
    run: Arc<RunState>,
) where
    S: KeySource,
    P: ConnectionPool,
    C: StoreClient<Connection = P::Connection>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if run.live_workers() == 0 {
                    break;
                }
                join_all(workers.iter().map(|worker| worker.flush())).await;
            }
        }
    }
    log_debug!(component = "worker", event = "flusher_stopped", run = %run.run_id);
}
