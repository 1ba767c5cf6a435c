//! Unbounded key stream fed by an external listener (e.g. keyspace
//! notifications).

use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use super::KeySource;
use crate::{
    error::SourceError,
    observability::{log_debug, log_info},
    record::Key,
};

/// Producer half of a [`LiveKeySource`].
#[derive(Debug, Clone)]
pub struct KeySender {
    tx: Sender<Key>,
}

impl KeySender {
    /// Queue a key for enumeration, waiting while the source buffer is full.
    ///
    /// Returns `false` once the source has been dropped.
    pub async fn send(&self, key: impl Into<Key>) -> bool {
        self.tx.send_async(key.into()).await.is_ok()
    }

    /// Queue a key without waiting. Returns `false` if the buffer is full or
    /// the source is gone.
    pub fn try_send(&self, key: impl Into<Key>) -> bool {
        self.tx.try_send(key.into()).is_ok()
    }
}

/// [`KeySource`] over keys pushed through [`KeySender`]s.
///
/// Each pushed key is handed to exactly one `next` caller. The stream ends
/// when every sender is dropped and the buffer is drained, or on `stop`.
#[derive(Debug)]
pub struct LiveKeySource {
    rx: Receiver<Key>,
    stop: CancellationToken,
    started: AtomicBool,
}

impl LiveKeySource {
    /// Create a source buffering at most `capacity` undrawn keys.
    pub fn new(capacity: usize) -> (Self, KeySender) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            LiveKeySource {
                rx,
                stop: CancellationToken::new(),
                started: AtomicBool::new(false),
            },
            KeySender { tx },
        )
    }

    /// Keys pushed but not yet drawn.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl KeySource for LiveKeySource {
    async fn start(&self) -> Result<(), SourceError> {
        if !self.started.swap(true, Ordering::AcqRel) {
            log_info!(component = "source", event = "live_started");
        }
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.stop.is_cancelled() && !(self.rx.is_disconnected() && self.rx.is_empty())
    }

    async fn next(&self, n: usize) -> Result<Vec<Key>, SourceError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(SourceError::NotStarted);
        }
        let first = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Ok(Vec::new()),
            key = self.rx.recv_async() => match key {
                Ok(key) => key,
                Err(_) => return Ok(Vec::new()),
            },
        };
        let mut batch = Vec::with_capacity(n.min(self.rx.len() + 1));
        batch.push(first);
        while batch.len() < n {
            match self.rx.try_recv() {
                Ok(key) => batch.push(key),
                Err(_) => break,
            }
        }
        log_debug!(component = "source", event = "live_batch", keys = batch.len());
        Ok(batch)
    }

    async fn stop(&self) {
        self.stop.cancel();
        let discarded = self.rx.drain().count();
        log_debug!(component = "source", event = "live_stopped", discarded);
    }
}
