use std::future::Future;

/// Spawns the long-lived tasks of a pipeline (workers and the flush timer).
pub trait Executor: Send + Sync + 'static {
    type JoinHandle<R>: Future<Output = Option<R>> + Send + Unpin + 'static
    where
        R: Send + 'static;

    fn spawn<F>(&self, future: F) -> Self::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

#[cfg(feature = "tokio")]
pub mod tokio {
    use std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::runtime::Handle;

    use super::Executor;

    /// Executor backed by a tokio runtime handle.
    #[derive(Debug, Clone)]
    pub struct TokioExecutor {
        handle: Handle,
    }

    impl TokioExecutor {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }
    }

    impl Default for TokioExecutor {
        /// Uses the runtime of the calling task; panics outside a runtime.
        fn default() -> Self {
            Self {
                handle: Handle::current(),
            }
        }
    }

    /// Join handle that resolves to `None` when the task panicked or was aborted.
    #[derive(Debug)]
    pub struct TokioJoinHandle<R>(tokio::task::JoinHandle<R>);

    impl<R> Future for TokioJoinHandle<R> {
        type Output = Option<R>;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            Pin::new(&mut self.0).poll(cx).map(Result::ok)
        }
    }

    impl Executor for TokioExecutor {
        type JoinHandle<R>
            = TokioJoinHandle<R>
        where
            R: Send + 'static;

        fn spawn<F>(&self, future: F) -> Self::JoinHandle<F::Output>
        where
            F: Future + Send + 'static,
            F::Output: Send + 'static,
        {
            TokioJoinHandle(self.handle.spawn(future))
        }
    }
}
