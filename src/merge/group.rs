//! Handle bound to a single merge group

use super::MergeBuffer;
use crate::error::MergeResult;
use crate::store::MergeStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// One merge group of a `MergeBuffer`.
///
/// Holds no state of its own; every call goes to the store.
#[derive(Debug)]
pub struct MergeGroup<'a, S: MergeStore> {
    buffer: &'a MergeBuffer<S>,
    key: String,
}

impl<'a, S: MergeStore> MergeGroup<'a, S> {
    pub(super) fn new(buffer: &'a MergeBuffer<S>, key: String) -> Self {
        MergeGroup { buffer, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn push<M: Serialize + ?Sized>(&self, message: &M, scheduled_time: i64) -> MergeResult<()> {
        self.buffer.push(&self.key, message, scheduled_time).await
    }

    pub async fn remove<M: Serialize + ?Sized>(&self, message: &M) -> MergeResult<()> {
        self.buffer.remove(&self.key, message).await
    }

    pub async fn exists<M: Serialize + ?Sized>(&self, message: &M) -> MergeResult<bool> {
        self.buffer.exists(&self.key, message).await
    }

    pub async fn size(&self) -> MergeResult<u64> {
        self.buffer.size(&self.key).await
    }

    pub async fn scheduled_time(&self) -> MergeResult<Option<i64>> {
        self.buffer.scheduled_time(&self.key).await
    }

    pub async fn scheduled_at(&self) -> MergeResult<Option<SystemTime>> {
        self.buffer.scheduled_at(&self.key).await
    }

    pub async fn peek<T: DeserializeOwned>(&self) -> MergeResult<Vec<T>> {
        self.buffer.peek(&self.key).await
    }

    pub async fn drain<T: DeserializeOwned>(&self) -> MergeResult<Vec<T>> {
        self.buffer.drain(&self.key).await
    }

    pub async fn cancel(&self) -> MergeResult<()> {
        self.buffer.cancel(&self.key).await
    }

    pub async fn try_lock(&self, ttl: Duration) -> MergeResult<bool> {
        self.buffer.try_lock(&self.key, ttl).await
    }

    pub async fn lock_ttl(&self) -> MergeResult<Option<Duration>> {
        self.buffer.lock_ttl(&self.key).await
    }

    /// Whether the group is in the active registry
    pub async fn is_active(&self) -> MergeResult<bool> {
        Ok(self.buffer.active_groups().await?.contains(&self.key))
    }
}
