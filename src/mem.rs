//! In-memory keyed store.
//!
//! Useful as a replication source in tests and for local tooling. Keys are
//! kept ordered, so a scan cursor is simply the last key handed out.

use std::{
    ops::Bound,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use crossbeam_skiplist::SkipMap;

use crate::{
    error::{FetchError, SourceError},
    fetch::StoreClient,
    record::{Key, KeyValue, Value},
    source::{KeyScanner, ScanPage},
};

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Handle issued by [`MemStore::connections`].
#[derive(Debug, PartialEq, Eq)]
pub struct MemConnection {
    id: u64,
}

impl MemConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
pub struct MemStore {
    entries: SkipMap<Key, Entry>,
    next_connection: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<Key>, value: Value) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    pub fn set_with_ttl(&self, key: impl Into<Key>, value: Value, ttl: Duration) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Set a time-to-live on an existing key. Returns `false` if the key is
    /// missing.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.replace_expiry(key, Some(Instant::now() + ttl))
    }

    /// Remove the time-to-live of a key.
    pub fn persist(&self, key: &str) -> bool {
        self.replace_expiry(key, None)
    }

    fn replace_expiry(&self, key: &str, expires_at: Option<Instant>) -> bool {
        let Some(value) = self.live_value(key, Instant::now()) else {
            return false;
        };
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<KeyValue> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        let entry = entry.value();
        if entry.is_expired(now) {
            return None;
        }
        Some(record(key, entry, now))
    }

    /// Number of keys that have not expired.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build `n` connection handles, e.g. to seed a
    /// [`FixedPool`](crate::pool::FixedPool).
    pub fn connections(&self, n: usize) -> Vec<MemConnection> {
        (0..n)
            .map(|_| MemConnection {
                id: self.next_connection.fetch_add(1, Ordering::Relaxed),
            })
            .collect()
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<Value> {
        let entry = self.entries.get(key)?;
        let entry = entry.value();
        (!entry.is_expired(now)).then(|| entry.value.clone())
    }
}

fn record(key: &str, entry: &Entry, now: Instant) -> KeyValue {
    match entry.expires_at {
        Some(at) => KeyValue::with_ttl(key, entry.value.clone(), at.saturating_duration_since(now)),
        None => KeyValue::new(key, entry.value.clone()),
    }
}

impl KeyScanner for MemStore {
    async fn scan(&self, cursor: Option<&str>, count: usize) -> Result<ScanPage, SourceError> {
        let now = Instant::now();
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        let visited: Vec<_> = self
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take(count + 1)
            .collect();

        let more = visited.len() > count;
        let visited = &visited[..visited.len().min(count)];
        let keys = visited
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let cursor = if more {
            visited.last().map(|e| e.key().clone())
        } else {
            None
        };
        Ok(ScanPage { keys, cursor })
    }
}

impl StoreClient for MemStore {
    type Connection = MemConnection;

    async fn fetch(
        &self,
        _conn: &mut MemConnection,
        keys: &[Key],
        _timeout: Duration,
    ) -> Result<Vec<KeyValue>, FetchError> {
        Ok(keys
            .iter()
            .map(|key| self.get(key).unwrap_or_else(|| KeyValue::missing(key.as_str())))
            .collect())
    }
}
