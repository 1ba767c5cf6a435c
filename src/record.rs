//! Keys and fetched key-value records.

use std::{fmt, time::Duration};

use bytes::Bytes;

/// Opaque store key produced by a key source.
pub type Key = String;

/// Store type tag of a fetched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Key did not exist when its value was fetched.
    None,
    /// Plain string value.
    String,
    /// Ordered list.
    List,
    /// Unordered set of members.
    Set,
    /// Set of members ordered by score.
    ZSet,
    /// Field/value map.
    Hash,
    /// Append-only stream of entries.
    Stream,
}

impl DataType {
    /// Lower-case store name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::String => "string",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::ZSet => "zset",
            DataType::Hash => "hash",
            DataType::Stream => "stream",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Entry id, e.g. `1526919030474-0`.
    pub id: String,
    /// Field/value pairs in insertion order.
    pub fields: Vec<(Bytes, Bytes)>,
}

/// Decoded value payload of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The key vanished between enumeration and fetch.
    None,
    String(Bytes),
    List(Vec<Bytes>),
    Set(Vec<Bytes>),
    /// Members with their scores, ordered by score.
    ZSet(Vec<(f64, Bytes)>),
    Hash(Vec<(Bytes, Bytes)>),
    Stream(Vec<StreamEntry>),
}

impl Value {
    /// Type tag matching this payload.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::None => DataType::None,
            Value::String(_) => DataType::String,
            Value::List(_) => DataType::List,
            Value::Set(_) => DataType::Set,
            Value::ZSet(_) => DataType::ZSet,
            Value::Hash(_) => DataType::Hash,
            Value::Stream(_) => DataType::Stream,
        }
    }
}

/// Result of fetching one key: type, value and remaining time-to-live.
///
/// Immutable once built; ownership moves from the worker to the queue and
/// then to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    key: Key,
    value: Value,
    ttl: Option<Duration>,
}

impl KeyValue {
    /// Record for a key without expiry.
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    /// Record for a key that expires after `ttl`.
    pub fn with_ttl(key: impl Into<Key>, value: Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: Some(ttl),
        }
    }

    /// Record for a key that no longer exists.
    pub fn missing(key: impl Into<Key>) -> Self {
        Self::new(key, Value::None)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    /// Remaining time-to-live, `None` when the key does not expire.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn into_parts(self) -> (Key, Value, Option<Duration>) {
        (self.key, self.value, self.ttl)
    }
}
