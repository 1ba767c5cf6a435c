use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    error::FetchError,
    observability::log_debug,
    pool::ConnectionPool,
    record::{Key, KeyValue},
};

/// Store access used to resolve keys into records.
pub trait StoreClient: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Fetch type, value and ttl of every key in `keys`, in order.
    ///
    /// `timeout` is the caller's deadline; clients may use it to configure
    /// command timeouts. The fetcher enforces it regardless.
    fn fetch(
        &self,
        conn: &mut Self::Connection,
        keys: &[Key],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<KeyValue>, FetchError>> + Send;
}

/// Resolves key batches into records over pooled connections.
pub struct ValueFetcher<P, C> {
    pool: Arc<P>,
    client: Arc<C>,
    timeout: Duration,
}

impl<P, C> ValueFetcher<P, C>
where
    P: ConnectionPool,
    C: StoreClient<Connection = P::Connection>,
{
    pub fn new(pool: Arc<P>, client: Arc<C>, timeout: Duration) -> Self {
        Self {
            pool,
            client,
            timeout,
        }
    }

    /// Fetch one batch. The connection is borrowed for this call only.
    pub async fn fetch(&self, keys: &[Key]) -> Result<Vec<KeyValue>, FetchError> {
        let mut conn = self.pool.borrow().await?;
        let fetch = self.client.fetch(&mut conn, keys, self.timeout);
        let result = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };
        match &result {
            Err(err) if err.is_connection() => self.pool.invalidate(conn),
            _ => self.pool.release(conn),
        }
        log_debug!(
            component = "fetch",
            event = "batch_fetched",
            keys = keys.len(),
            ok = result.is_ok(),
        );
        result
    }
}

impl<P, C> Clone for ValueFetcher<P, C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            client: Arc::clone(&self.client),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{error::PoolError, pool::FixedPool, record::Value};

    #[derive(Default)]
    struct EchoClient {
        stall: bool,
        broken: AtomicBool,
    }

    impl StoreClient for EchoClient {
        type Connection = u32;

        async fn fetch(
            &self,
            _conn: &mut u32,
            keys: &[Key],
            _timeout: Duration,
        ) -> Result<Vec<KeyValue>, FetchError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.broken.load(Ordering::Acquire) {
                return Err(FetchError::Connection("reset by peer".into()));
            }
            Ok(keys
                .iter()
                .map(|k| KeyValue::new(k.clone(), Value::String(k.clone().into())))
                .collect())
        }
    }

    fn fetcher(
        client: EchoClient,
        timeout: Duration,
    ) -> (Arc<FixedPool<u32>>, ValueFetcher<FixedPool<u32>, EchoClient>) {
        let pool = Arc::new(FixedPool::new([7u32]).max_wait(Duration::from_millis(20)));
        let fetcher = ValueFetcher::new(Arc::clone(&pool), Arc::new(client), timeout);
        (pool, fetcher)
    }

    #[tokio::test]
    async fn returns_records_in_key_order_and_releases() {
        let (pool, fetcher) = fetcher(EchoClient::default(), Duration::from_secs(1));
        let keys = vec!["b".to_string(), "a".to_string()];
        let records = fetcher.fetch(&keys).await.unwrap();
        assert_eq!(
            records.iter().map(KeyValue::key).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_batch_error() {
        let client = EchoClient {
            stall: true,
            ..Default::default()
        };
        let (pool, fetcher) = fetcher(client, Duration::from_millis(50));
        let err = fetcher.fetch(&["k".to_string()]).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(!err.is_connection());
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn connection_failure_invalidates() {
        let client = EchoClient::default();
        client.broken.store(true, Ordering::Release);
        let (pool, fetcher) = fetcher(client, Duration::from_secs(1));

        let err = fetcher.fetch(&["k".to_string()]).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(pool.live(), 0);

        let err = fetcher.fetch(&["k".to_string()]).await.unwrap_err();
        assert!(matches!(err, FetchError::Pool(PoolError::Closed)));
    }
}
