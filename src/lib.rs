//! Merge buffer: a durable, key-addressed staging area for batched messages.
//!
//! Producers `push` messages under a merge group key; the first push fixes
//! the group's scheduled flush time. A flusher takes the group's lock and
//! `drain`s every queued message in one atomic step. All state lives in a
//! shared store with Redis semantics, so any number of processes can share
//! one buffer.
//!
//! ```no_run
//! use merge_buffer::{MergeBuffer, MergeBufferConfig, InMemoryStore};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let buffer = MergeBuffer::new(InMemoryStore::new(), &MergeBufferConfig::test())?;
//! buffer.push("digest:42", &serde_json::json!({"post": 1}), 1_700_000_000).await?;
//!
//! if buffer.try_lock("digest:42", Duration::from_secs(60)).await? {
//!     let batch: Vec<serde_json::Value> = buffer.drain("digest:42").await?;
//!     assert_eq!(batch.len(), 1);
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod merge;
pub mod observability;
pub mod store;

#[cfg(test)]
mod stateright;

pub use clock::{Clock, ProductionClock, SimulatedClock, Timestamp};
pub use config::{ConfigError, MergeBufferConfig, StoreConfig, StoreKind};
pub use error::{MergeError, MergeResult, StoreError, StoreResult};
pub use keys::{KeySpace, DEFAULT_NAMESPACE};
pub use merge::{MergeBuffer, MergeGroup};
pub use store::{
    InMemoryStore, MergeStore, Reply, ResolvePolicy, SimulatedStore, SimulatedStoreConfig,
    StoreCommand, Transaction,
};

#[cfg(feature = "redis-store")]
pub use store::RedisStore;
