//! Bulk reset of every key in the namespace

use super::MergeBuffer;
use crate::error::MergeResult;
use crate::store::{MergeStore, StoreCommand};
use tracing::info;

impl<S: MergeStore> MergeBuffer<S> {
    /// Delete the registry and every group's keys in one server-side step.
    ///
    /// Returns the number of keys deleted. For tests and operations; not part
    /// of the normal message flow.
    pub async fn purge(&self) -> MergeResult<u64> {
        let deleted = self
            .store
            .execute(StoreCommand::DeleteMatching {
                patterns: self.keys.purge_patterns(),
            })
            .await?
            .into_integer()?;

        info!(namespace = self.keys.namespace(), deleted, "purged namespace");
        Ok(deleted.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::keys::KeySpace;
    use crate::merge::MergeBuffer;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_purge_removes_all_structures() {
        let store = InMemoryStore::new();
        let buffer = MergeBuffer::with_keyspace(store.clone(), KeySpace::new("ns").unwrap());
        buffer.push("a", &json!(1), 10).await.unwrap();
        buffer.push("b", &json!(2), 20).await.unwrap();
        buffer.try_lock("a", Duration::from_secs(30)).await.unwrap();

        // merges + (unique_msg, msg, time) * 2 + lock
        assert_eq!(buffer.purge().await.unwrap(), 8);
        assert_eq!(store.key_count(), 0);
        assert!(buffer.active_groups().await.unwrap().is_empty());
        assert_eq!(buffer.scheduled_time("a").await.unwrap(), None);
        assert!(buffer.try_lock("a", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_spares_other_namespaces() {
        let store = InMemoryStore::new();
        let ours = MergeBuffer::with_keyspace(store.clone(), KeySpace::new("ours").unwrap());
        let theirs = MergeBuffer::with_keyspace(store.clone(), KeySpace::new("theirs").unwrap());
        ours.push("g", &json!(1), 1).await.unwrap();
        theirs.push("g", &json!(1), 1).await.unwrap();

        ours.purge().await.unwrap();
        assert_eq!(theirs.size("g").await.unwrap(), 1);
        assert_eq!(theirs.active_groups().await.unwrap(), vec!["g"]);
    }

    #[tokio::test]
    async fn test_purge_empty_namespace() {
        let buffer = MergeBuffer::with_keyspace(InMemoryStore::new(), KeySpace::new("ns").unwrap());
        assert_eq!(buffer.purge().await.unwrap(), 0);
    }
}
