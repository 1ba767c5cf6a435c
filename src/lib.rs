//! Concurrent bulk key-value extraction.
//!
//! kvpipe exports the contents of a keyed store at high throughput without
//! exhausting memory or overloading the store. A [`KeySource`] enumerates
//! keys, a pool of workers resolves them into [`KeyValue`] records over
//! pooled connections, and a bounded queue hands the records to a single
//! consumer through [`KeyValueReader::read`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kvpipe::{
//!     mem::MemStore, FixedPool, KeyValueReader, ReaderOption, ScanKeySource, ScanOption,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemStore::new());
//! let source = ScanKeySource::new(Arc::clone(&store), ScanOption::default())?;
//! let pool = FixedPool::new(store.connections(4));
//! let reader = KeyValueReader::new(
//!     Arc::new(source),
//!     Arc::new(pool),
//!     store,
//!     ReaderOption::default().threads(4),
//! );
//!
//! reader.open().await?;
//! while let Some(record) = reader.read().await? {
//!     println!("{} ({})", record.key(), record.data_type());
//! }
//! reader.close().await;
//! # Ok(())
//! # }
//! ```

mod observability;
mod stats;
mod worker;

pub mod error;
pub mod executor;
pub mod fetch;
pub mod mem;
pub mod option;
pub mod pool;
pub mod reader;
pub mod record;
pub mod source;

pub use crate::{
    error::{ConfigError, FetchError, PoolError, ReaderError, SourceError},
    fetch::{StoreClient, ValueFetcher},
    option::{ReaderOption, ScanOption},
    pool::{ConnectionPool, FixedPool},
    reader::{KeyValueReader, PipelineState},
    record::{DataType, Key, KeyValue, StreamEntry, Value},
    source::{KeyPattern, KeyScanner, KeySender, KeySource, LiveKeySource, ScanKeySource, ScanPage},
    stats::ReaderStatsSnapshot,
};
