//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use kvpipe::{
    executor::tokio::TokioExecutor,
    mem::{MemConnection, MemStore},
    FetchError, FixedPool, Key, KeyScanner, KeySource, KeyValue, KeyValueReader, ReaderError,
    ScanKeySource, ScanOption, ScanPage, SourceError, StoreClient, Value,
};

pub type Reader<S, C> = KeyValueReader<S, FixedPool<MemConnection>, C, TokioExecutor>;

pub fn key(i: usize) -> Key {
    format!("key:{i:05}")
}

/// Store holding `n` string keys `key:00000..`.
pub fn populated_store(n: usize) -> Arc<MemStore> {
    let store = Arc::new(MemStore::new());
    for i in 0..n {
        store.set(key(i), Value::String(format!("value-{i}").into()));
    }
    store
}

pub fn scan_source(store: &Arc<MemStore>, count: usize) -> ScanKeySource<Arc<MemStore>> {
    ScanKeySource::new(Arc::clone(store), ScanOption::default().count(count))
        .expect("scan source configuration")
}

pub fn pool(store: &MemStore, size: usize) -> Arc<FixedPool<MemConnection>> {
    Arc::new(FixedPool::new(store.connections(size)).max_wait(Duration::from_millis(200)))
}

/// Read until end-of-stream or error, returning the keys seen and the
/// terminal result.
pub async fn drain<S, C>(reader: &Reader<S, C>) -> (Vec<Key>, Result<(), ReaderError>)
where
    S: KeySource,
    C: StoreClient<Connection = MemConnection>,
{
    let mut keys = Vec::new();
    loop {
        match reader.read().await {
            Ok(Some(record)) => keys.push(record.key().to_string()),
            Ok(None) => return (keys, Ok(())),
            Err(err) => return (keys, Err(err)),
        }
    }
}

/// Client over a [`MemStore`] with injectable failures.
pub struct FaultyClient {
    store: Arc<MemStore>,
    poison: HashSet<Key>,
    broken_connections: HashSet<u64>,
    delay: Option<Duration>,
    panics: bool,
    pub fetches: AtomicUsize,
}

impl FaultyClient {
    pub fn new(store: Arc<MemStore>) -> Self {
        Self {
            store,
            poison: HashSet::new(),
            broken_connections: HashSet::new(),
            delay: None,
            panics: false,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Fail every batch containing `key` with a store error.
    pub fn poison(mut self, key: Key) -> Self {
        self.poison.insert(key);
        self
    }

    /// Fail every fetch issued on connection `id` with a connection error.
    pub fn broken_connection(mut self, id: u64) -> Self {
        self.broken_connections.insert(id);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside every fetch.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl StoreClient for FaultyClient {
    type Connection = MemConnection;

    async fn fetch(
        &self,
        conn: &mut MemConnection,
        keys: &[Key],
        timeout: Duration,
    ) -> Result<Vec<KeyValue>, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("store client panicked on {} keys", keys.len());
        }
        if self.broken_connections.contains(&conn.id()) {
            return Err(FetchError::Connection("connection reset by peer".into()));
        }
        if keys.iter().any(|k| self.poison.contains(k)) {
            return Err(FetchError::Store("WRONGTYPE".into()));
        }
        self.store.fetch(conn, keys, timeout).await
    }
}

/// Key source wrapper logging every non-empty draw.
pub struct RecordingSource<S> {
    inner: S,
    pub draws: Mutex<Vec<Vec<Key>>>,
}

impl<S> RecordingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            draws: Mutex::new(Vec::new()),
        }
    }
}

impl<S: KeySource> KeySource for RecordingSource<S> {
    async fn start(&self) -> Result<(), SourceError> {
        self.inner.start().await
    }

    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    async fn next(&self, n: usize) -> Result<Vec<Key>, SourceError> {
        let batch = self.inner.next(n).await?;
        assert!(batch.len() <= n, "source returned more keys than requested");
        if !batch.is_empty() {
            self.draws.lock().unwrap().push(batch.clone());
        }
        Ok(batch)
    }

    async fn stop(&self) {
        self.inner.stop().await
    }
}

/// Scanner over a [`MemStore`] that fails once `fail_after` pages were served.
pub struct FlakyScanner {
    store: Arc<MemStore>,
    fail_after: usize,
    calls: AtomicUsize,
}

impl FlakyScanner {
    pub fn new(store: Arc<MemStore>, fail_after: usize) -> Self {
        Self {
            store,
            fail_after,
            calls: AtomicUsize::new(0),
        }
    }
}

impl KeyScanner for FlakyScanner {
    async fn scan(&self, cursor: Option<&str>, count: usize) -> Result<ScanPage, SourceError> {
        if self.calls.fetch_add(1, Ordering::Relaxed) >= self.fail_after {
            return Err(SourceError::Scan {
                cursor: cursor.map(str::to_string),
                message: "connection lost during SCAN".into(),
            });
        }
        self.store.scan(cursor, count).await
    }
}
