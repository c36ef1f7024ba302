//! Store Abstraction
//!
//! The merge buffer coordinates exclusively through a key-value store with
//! Redis semantics. This module defines the command subset it needs, the
//! reply shape, and MULTI/EXEC transactions whose replies are handed back
//! through `Deferred` handles.
//!
//! Implementations:
//! - `InMemoryStore`: single-process keyspace for tests, DST and embedding
//! - `SimulatedStore`: fault-injecting wrapper for any store
//! - `RedisStore`: a real Redis server (feature `redis-store`)

mod deferred;
pub mod memory;
pub mod simulated;

#[cfg(feature = "redis-store")]
pub mod redis_store;

pub use deferred::{Deferred, ResolvePolicy};
pub use memory::InMemoryStore;
pub use simulated::{SimulatedStore, SimulatedStoreConfig, SimulatedStoreStats};

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::pin::Pin;

/// Commands issued by the merge buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    SIsMember { key: String, member: String },
    SMembers { key: String },
    LPush { key: String, value: String },
    LRange { key: String, start: i64, stop: i64 },
    /// Remove `count` occurrences of `value`; 0 removes all of them
    LRem { key: String, count: i64, value: String },
    LLen { key: String },
    Get { key: String },
    SetNx { key: String, value: String },
    /// `SET key value NX PX ttl_ms`
    SetNxPx {
        key: String,
        value: String,
        ttl_ms: u64,
    },
    PTtl { key: String },
    Del { keys: Vec<String> },
    /// Delete every key matching any pattern, server side and atomically
    DeleteMatching { patterns: Vec<String> },
}

impl StoreCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::SAdd { .. } => "SADD",
            StoreCommand::SRem { .. } => "SREM",
            StoreCommand::SIsMember { .. } => "SISMEMBER",
            StoreCommand::SMembers { .. } => "SMEMBERS",
            StoreCommand::LPush { .. } => "LPUSH",
            StoreCommand::LRange { .. } => "LRANGE",
            StoreCommand::LRem { .. } => "LREM",
            StoreCommand::LLen { .. } => "LLEN",
            StoreCommand::Get { .. } => "GET",
            StoreCommand::SetNx { .. } => "SETNX",
            StoreCommand::SetNxPx { .. } => "SET",
            StoreCommand::PTtl { .. } => "PTTL",
            StoreCommand::Del { .. } => "DEL",
            StoreCommand::DeleteMatching { .. } => "EVAL",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            StoreCommand::SIsMember { .. }
                | StoreCommand::SMembers { .. }
                | StoreCommand::LRange { .. }
                | StoreCommand::LLen { .. }
                | StoreCommand::Get { .. }
                | StoreCommand::PTtl { .. }
        )
    }
}

/// Reply to a single store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    /// Per-command error reply; inside a transaction the other commands still apply
    Error(String),
}

impl Reply {
    pub fn bulk(s: impl Into<String>) -> Self {
        Reply::Bulk(s.into().into_bytes())
    }

    /// Turn an error reply into `StoreError::Command`
    pub fn into_result(self) -> StoreResult<Reply> {
        match self {
            Reply::Error(msg) => Err(StoreError::Command(msg)),
            other => Ok(other),
        }
    }

    pub fn into_integer(self) -> StoreResult<i64> {
        match self.into_result()? {
            Reply::Integer(n) => Ok(n),
            other => Err(StoreError::Protocol(format!("expected integer, got {:?}", other))),
        }
    }

    pub fn into_bool(self) -> StoreResult<bool> {
        Ok(self.into_integer()? != 0)
    }

    /// `SET ... NX` answers OK when it set the key and nil when it did not
    pub fn into_set_flag(self) -> StoreResult<bool> {
        match self.into_result()? {
            Reply::Ok => Ok(true),
            Reply::Nil => Ok(false),
            other => Err(StoreError::Protocol(format!("expected OK or nil, got {:?}", other))),
        }
    }

    pub fn into_optional_string(self) -> StoreResult<Option<String>> {
        match self.into_result()? {
            Reply::Nil => Ok(None),
            Reply::Bulk(bytes) => bulk_to_string(bytes).map(Some),
            other => Err(StoreError::Protocol(format!("expected bulk string, got {:?}", other))),
        }
    }

    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        match self.into_result()? {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(bytes) => bulk_to_string(bytes),
                    other => Err(StoreError::Protocol(format!(
                        "expected bulk string element, got {:?}",
                        other
                    ))),
                })
                .collect(),
            other => Err(StoreError::Protocol(format!("expected array, got {:?}", other))),
        }
    }
}

fn bulk_to_string(bytes: Vec<u8>) -> StoreResult<String> {
    String::from_utf8(bytes).map_err(|e| StoreError::Protocol(format!("non-utf8 value: {}", e)))
}

/// Commands queued for one MULTI/EXEC round trip.
///
/// Each queued command yields a `Deferred` that the store completes once
/// the transaction has executed.
#[derive(Debug, Default)]
pub struct Transaction {
    commands: Vec<StoreCommand>,
    slots: Vec<Deferred>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, command: StoreCommand) -> Deferred {
        let slot = Deferred::new();
        self.commands.push(command);
        self.slots.push(slot.clone());
        slot
    }

    pub fn commands(&self) -> &[StoreCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Hand EXEC replies to their deferred slots.
    ///
    /// Every slot is completed even if some replies are errors; the first
    /// error is then returned.
    pub fn complete(self, replies: Vec<Reply>) -> StoreResult<()> {
        if replies.len() != self.slots.len() {
            return Err(StoreError::Protocol(format!(
                "transaction queued {} commands but got {} replies",
                self.slots.len(),
                replies.len()
            )));
        }

        let mut first_error = None;
        for (slot, reply) in self.slots.iter().zip(replies) {
            if let (Reply::Error(msg), None) = (&reply, &first_error) {
                first_error = Some(StoreError::Command(msg.clone()));
            }
            slot.fulfill(reply);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Key-value store with Redis semantics
pub trait MergeStore: Send + Sync + 'static {
    /// Execute a single command
    fn execute<'a>(
        &'a self,
        command: StoreCommand,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Reply>> + Send + 'a>>;

    /// Execute a transaction as one atomic unit and complete its deferreds
    fn execute_atomic<'a>(
        &'a self,
        transaction: Transaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>>;
}
