//! Connection pooling seam.
//!
//! Pools are built and sized by the caller; the pipeline only borrows a
//! connection per fetch and hands it back right after.

use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use flume::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::{error::PoolError, observability::log_warn};

pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn borrow(&self) -> impl Future<Output = Result<Self::Connection, PoolError>> + Send;

    /// Return a healthy connection.
    fn release(&self, conn: Self::Connection);

    /// Discard a connection that failed.
    fn invalidate(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Pool over a fixed set of pre-built connections.
#[derive(Debug)]
pub struct FixedPool<C> {
    idle_tx: Sender<C>,
    idle_rx: Receiver<C>,
    live: AtomicUsize,
    // cancelled once the last connection is invalidated
    closed: CancellationToken,
    max_wait: Duration,
}

impl<C> FixedPool<C>
where
    C: Send + 'static,
{
    pub fn new(connections: impl IntoIterator<Item = C>) -> Self {
        let connections: Vec<C> = connections.into_iter().collect();
        let (idle_tx, idle_rx) = flume::bounded(connections.len().max(1));
        let live = connections.len();
        for conn in connections {
            // capacity equals the number of connections
            let _ = idle_tx.try_send(conn);
        }
        Self {
            idle_tx,
            idle_rx,
            live: AtomicUsize::new(live),
            closed: CancellationToken::new(),
            max_wait: Duration::from_secs(30),
        }
    }

    /// Longest a `borrow` waits for an idle connection.
    pub fn max_wait(self, max_wait: Duration) -> Self {
        FixedPool { max_wait, ..self }
    }

    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Connections not yet invalidated, idle or borrowed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl<C> ConnectionPool for FixedPool<C>
where
    C: Send + 'static,
{
    type Connection = C;

    async fn borrow(&self) -> Result<C, PoolError> {
        if self.live.load(Ordering::Acquire) == 0 {
            return Err(PoolError::Closed);
        }
        let wait = tokio::time::timeout(self.max_wait, self.idle_rx.recv_async());
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(PoolError::Closed),
            idle = wait => match idle {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(_)) => Err(PoolError::Closed),
                Err(_) => Err(PoolError::Exhausted(self.max_wait)),
            },
        }
    }

    fn release(&self, conn: C) {
        let _ = self.idle_tx.try_send(conn);
    }

    fn invalidate(&self, conn: C) {
        drop(conn);
        let remaining = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        if remaining == 0 {
            self.closed.cancel();
        }
        log_warn!(
            component = "pool",
            event = "connection_invalidated",
            remaining
        );
    }
}
