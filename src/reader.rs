//! Pipeline orchestration.
//!
//! [`KeyValueReader`] owns the key source lifecycle, the bounded record queue,
//! the worker tasks and the optional flush timer, and exposes them to a
//! single consumer through [`KeyValueReader::read`].
//!
//! ```text
//! KeySource ─┬─> Worker ─┐
//!            ├─> Worker ─┼─> bounded queue ─> read()
//!            └─> Worker ─┘
//! ```

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use async_lock::Mutex;
use flume::Receiver;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

#[cfg(feature = "tokio")]
use crate::executor::tokio::TokioExecutor;
use crate::{
    error::{ReaderError, SourceError},
    executor::Executor,
    fetch::{StoreClient, ValueFetcher},
    observability::{log_error, log_info, log_warn},
    option::ReaderOption,
    pool::ConnectionPool,
    record::KeyValue,
    source::KeySource,
    stats::{ReaderStats, ReaderStatsSnapshot},
    worker::{flush_periodically, Worker, WorkerExit},
};

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    /// Constructed, not opened.
    Idle = 0,
    /// Workers are running.
    Running = 1,
    /// Shutdown requested or the key source failed; workers are draining.
    Stopping = 2,
    /// Every worker has exited.
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Idle,
            1 => PipelineState::Running,
            2 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State shared between the reader and its workers for one run.
pub(crate) struct RunState {
    pub(crate) run_id: Ulid,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: ReaderStats,
    state: AtomicU8,
    failure: OnceLock<Arc<SourceError>>,
    live_workers: AtomicUsize,
    exhausted_workers: AtomicUsize,
    degraded_workers: AtomicUsize,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self {
            run_id: Ulid::new(),
            cancel: CancellationToken::new(),
            stats: ReaderStats::default(),
            state: AtomicU8::new(PipelineState::Idle as u8),
            failure: OnceLock::new(),
            live_workers: AtomicUsize::new(0),
            exhausted_workers: AtomicUsize::new(0),
            degraded_workers: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn workers_started(&self, workers: usize) {
        self.live_workers.store(workers, Ordering::Release);
        self.set_state(PipelineState::Running);
    }

    pub(crate) fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    fn failure(&self) -> Option<ReaderError> {
        self.failure
            .get()
            .map(|err| ReaderError::Enumeration(Arc::clone(err)))
    }

    /// Record a fatal enumeration error and stop every worker.
    pub(crate) fn fail(&self, err: SourceError) {
        if self.failure.set(Arc::new(err)).is_err() {
            return;
        }
        if let Some(err) = self.failure.get() {
            log_error!(
                component = "reader",
                event = "enumeration_failed",
                run = %self.run_id,
                error = %err,
            );
        }
        self.transition(PipelineState::Running, PipelineState::Stopping);
        self.cancel.cancel();
    }

    pub(crate) fn worker_exited(&self, worker: usize, exit: WorkerExit) {
        if exit.is_failure() {
            self.degraded_workers.fetch_add(1, Ordering::AcqRel);
            self.stats.record_degraded();
        }
        match exit {
            WorkerExit::Exhausted => {
                self.exhausted_workers.fetch_add(1, Ordering::AcqRel);
            }
            WorkerExit::ConnectionFailed => {
                log_warn!(
                    component = "reader",
                    event = "worker_degraded",
                    run = %self.run_id,
                    worker,
                );
            }
            WorkerExit::Panicked => {
                log_error!(
                    component = "reader",
                    event = "worker_panicked",
                    run = %self.run_id,
                    worker,
                );
            }
            WorkerExit::Cancelled | WorkerExit::EnumerationFailed => {}
        }
        // counted after the worker's last publish, so zero live workers means
        // nothing more will reach the queue
        let remaining = self.live_workers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.transition(PipelineState::Stopping, PipelineState::Stopped);
            log_info!(
                component = "reader",
                event = "workers_drained",
                run = %self.run_id,
                state = %self.state(),
            );
        }
    }
}

struct Running<E: Executor> {
    queue: Receiver<KeyValue>,
    workers: Vec<E::JoinHandle<WorkerExit>>,
    flusher: Option<E::JoinHandle<()>>,
}

enum Lifecycle<E: Executor> {
    Idle,
    Running(Running<E>),
    Closed,
}

/// Concurrent key-value reader.
///
/// A single consumer calls [`open`](Self::open), then [`read`](Self::read)
/// until it yields `Ok(None)`, then [`close`](Self::close). A reader runs
/// once: `open` after `close` does nothing and `read` reports
/// [`ReaderError::Closed`].
pub struct KeyValueReader<S, P, C, E>
where
    E: Executor,
{
    source: Arc<S>,
    fetcher: ValueFetcher<P, C>,
    option: ReaderOption,
    executor: E,
    run: Arc<RunState>,
    lifecycle: Mutex<Lifecycle<E>>,
}

#[cfg(feature = "tokio")]
impl<S, P, C> KeyValueReader<S, P, C, TokioExecutor>
where
    S: KeySource,
    P: ConnectionPool,
    C: StoreClient<Connection = P::Connection>,
{
    /// Reader spawning its tasks on the current tokio runtime.
    pub fn new(source: Arc<S>, pool: Arc<P>, client: Arc<C>, option: ReaderOption) -> Self {
        Self::with_executor(source, pool, client, option, TokioExecutor::default())
    }
}

impl<S, P, C, E> KeyValueReader<S, P, C, E>
where
    S: KeySource,
    P: ConnectionPool,
    C: StoreClient<Connection = P::Connection>,
    E: Executor,
{
    pub fn with_executor(
        source: Arc<S>,
        pool: Arc<P>,
        client: Arc<C>,
        option: ReaderOption,
        executor: E,
    ) -> Self {
        let fetcher = ValueFetcher::new(pool, client, option.timeout);
        Self {
            source,
            fetcher,
            option,
            executor,
            run: Arc::new(RunState::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Start the key source, the workers and the flush timer.
    ///
    /// Does nothing if the reader was already opened or closed.
    pub async fn open(&self) -> Result<(), ReaderError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Ok(());
        }
        self.option.validate()?;
        self.source.start().await?;

        let threads = self.option.threads;
        let (tx, queue) = flume::bounded(self.option.queue_capacity);
        let workers: Vec<_> = (0..threads)
            .map(|id| {
                Arc::new(Worker::new(
                    id,
                    self.option.batch_size,
                    Arc::clone(&self.source),
                    self.fetcher.clone(),
                    tx.clone(),
                    Arc::clone(&self.run),
                ))
            })
            .collect();
        drop(tx);

        self.run.workers_started(threads);
        let handles: Vec<_> = workers
            .iter()
            .map(|worker| self.executor.spawn(Arc::clone(worker).run()))
            .collect();
        let flusher = self.option.flush_interval.map(|interval| {
            self.executor
                .spawn(flush_periodically(workers, interval, Arc::clone(&self.run)))
        });

        log_info!(
            component = "reader",
            event = "reader_opened",
            run = %self.run.run_id,
            threads,
            queue_capacity = self.option.queue_capacity,
            batch_size = self.option.batch_size,
            flush_interval = ?self.option.flush_interval,
        );
        *lifecycle = Lifecycle::Running(Running {
            queue,
            workers: handles,
            flusher,
        });
        Ok(())
    }

    /// Next record, or `Ok(None)` at end-of-stream.
    ///
    /// End-of-stream means every worker has finished and the queue is empty.
    /// Once reached, further calls keep returning `Ok(None)`. A `close` that
    /// races this call also ends it with `Ok(None)`.
    pub async fn read(&self) -> Result<Option<KeyValue>, ReaderError> {
        let queue = {
            let lifecycle = self.lifecycle.lock().await;
            match &*lifecycle {
                Lifecycle::Idle => return Err(ReaderError::NotOpen),
                Lifecycle::Closed => return Err(ReaderError::Closed),
                Lifecycle::Running(running) => running.queue.clone(),
            }
        };

        loop {
            if let Some(err) = self.run.failure() {
                return Err(err);
            }
            tokio::select! {
                biased;
                _ = self.run.cancel.cancelled() => {
                    return match self.run.failure() {
                        Some(err) => Err(err),
                        None => Ok(None),
                    };
                }
                polled = tokio::time::timeout(self.option.poll_interval, queue.recv_async()) => {
                    match polled {
                        Ok(Ok(record)) => return Ok(Some(record)),
                        // every worker dropped its sender, nothing more can arrive
                        Ok(Err(_)) => return self.end_of_stream(),
                        Err(_) => {
                            if self.run.live_workers() == 0 && queue.is_empty() {
                                return self.end_of_stream();
                            }
                        }
                    }
                }
            }
        }
    }

    /// Outcome once no worker is left to publish and the queue is drained.
    ///
    /// Without a worker that reached exhaustion the keyspace was never fully
    /// read, so losing every worker is an error rather than end-of-stream.
    fn end_of_stream(&self) -> Result<Option<KeyValue>, ReaderError> {
        if let Some(err) = self.run.failure() {
            return Err(err);
        }
        let exhausted = self.run.exhausted_workers.load(Ordering::Acquire);
        let degraded = self.run.degraded_workers.load(Ordering::Acquire);
        if exhausted == 0 && degraded > 0 {
            return Err(ReaderError::WorkersFailed { workers: degraded });
        }
        Ok(None)
    }

    /// Stop the workers and the key source and discard the queue.
    ///
    /// Producers blocked on a full queue are woken. In-flight fetches are not
    /// cancelled; `close` waits for them at most `close_timeout`, then leaves
    /// them to finish in the background. Calling it again does nothing.
    pub async fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = match mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Running(running) => running,
            other => {
                *lifecycle = other;
                return;
            }
        };

        if !self.run.transition(PipelineState::Running, PipelineState::Stopping) {
            log_info!(
                component = "reader",
                event = "close_after_stop",
                run = %self.run.run_id,
                state = %self.run.state(),
            );
        }
        if self.run.live_workers() == 0 {
            self.run.transition(PipelineState::Stopping, PipelineState::Stopped);
        }
        self.run.cancel.cancel();
        self.source.stop().await;

        let Running {
            queue,
            workers,
            flusher,
        } = running;
        drop(queue);

        let drained = tokio::time::timeout(self.option.close_timeout, async move {
            join_all(workers).await;
            if let Some(flusher) = flusher {
                flusher.await;
            }
        })
        .await;
        if drained.is_err() {
            log_warn!(
                component = "reader",
                event = "workers_detached",
                run = %self.run.run_id,
                live_workers = self.run.live_workers(),
            );
        }
        let stats = self.run.stats.snapshot();
        log_info!(
            component = "reader",
            event = "reader_closed",
            run = %self.run.run_id,
            state = %self.run.state(),
            records = stats.records_published,
            keys_dropped = stats.keys_dropped,
        );
    }

    pub fn state(&self) -> PipelineState {
        self.run.state()
    }

    pub fn stats(&self) -> ReaderStatsSnapshot {
        self.run.stats.snapshot()
    }

    /// Records waiting in the queue. Zero when not running, or while `open`
    /// or `close` is in progress.
    pub fn queue_len(&self) -> usize {
        match self.lifecycle.try_lock().as_deref() {
            Some(Lifecycle::Running(running)) => running.queue.len(),
            _ => 0,
        }
    }
}

impl<S, P, C, E> Drop for KeyValueReader<S, P, C, E>
where
    E: Executor,
{
    fn drop(&mut self) {
        self.run.cancel.cancel();
    }
}
