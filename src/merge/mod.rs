//! Merge buffer core
//!
//! `MergeBuffer` stages messages per merge group in a shared store and hands
//! them back in one atomic drain. All coordination goes through the store:
//! every multi-key mutation is a single MULTI/EXEC, and concurrent drainers
//! serialize on `try_lock`.
//!
//! The implementation is split across files by facet:
//!
//! - `registry.rs`: the set of active groups
//! - `messages.rs`: push, remove, exists, size, peek, drain, cancel
//! - `schedule.rs`: scheduled time and the drain lock
//! - `purge.rs`: bulk reset of the namespace
//! - `group.rs`: `MergeGroup`, a handle bound to one group key
//! - `dst.rs`: deterministic simulation harness
//!
//! ## Known race
//!
//! A push that lands between a drain's LRANGE and its DEL cannot happen,
//! since both run in one EXEC. Delivery is still at-most-once from the
//! caller's side: if the drainer dies after EXEC, the batch is gone.

mod group;
mod messages;
mod purge;
mod registry;
mod schedule;

pub mod dst;

pub use group::MergeGroup;

use crate::config::{ConfigError, MergeBufferConfig};
use crate::error::{MergeError, MergeResult};
use crate::keys::KeySpace;
use crate::store::{MergeStore, ResolvePolicy, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Durable staging area for batched messages, keyed by merge group
#[derive(Debug)]
pub struct MergeBuffer<S: MergeStore> {
    store: S,
    keys: KeySpace,
    resolve: ResolvePolicy,
}

impl<S: MergeStore> MergeBuffer<S> {
    /// Build a buffer from validated configuration
    pub fn new(store: S, config: &MergeBufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(MergeBuffer {
            store,
            keys: KeySpace::new(config.namespace.as_str())?,
            resolve: config.resolve_policy(),
        })
    }

    pub fn with_keyspace(store: S, keys: KeySpace) -> Self {
        MergeBuffer {
            store,
            keys,
            resolve: ResolvePolicy::default(),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handle bound to one group key
    pub fn group(&self, key: impl Into<String>) -> MergeGroup<'_, S> {
        MergeGroup::new(self, key.into())
    }

    async fn commit(&self, transaction: Transaction) -> MergeResult<()> {
        self.store.execute_atomic(transaction).await?;
        Ok(())
    }
}

impl<S: MergeStore + Clone> Clone for MergeBuffer<S> {
    fn clone(&self) -> Self {
        MergeBuffer {
            store: self.store.clone(),
            keys: self.keys.clone(),
            resolve: self.resolve,
        }
    }
}

/// Messages are stored as their JSON text; that text is their identity.
pub(crate) fn encode<M: Serialize + ?Sized>(message: &M) -> MergeResult<String> {
    serde_json::to_string(message).map_err(MergeError::Encode)
}

pub(crate) fn decode_all<T: DeserializeOwned>(group: &str, raw: Vec<String>) -> MergeResult<Vec<T>> {
    raw.iter()
        .map(|msg| {
            serde_json::from_str(msg).map_err(|source| MergeError::Decode {
                group: group.to_string(),
                source,
            })
        })
        .collect()
}
