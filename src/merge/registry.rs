//! Registry of active merge groups

use super::MergeBuffer;
use crate::error::MergeResult;
use crate::store::{MergeStore, StoreCommand, Transaction};
use tracing::debug;

impl<S: MergeStore> MergeBuffer<S> {
    /// Add a group to the active set. Idempotent.
    pub async fn record_group(&self, group: &str) -> MergeResult<()> {
        self.store
            .execute(self.record_command(group))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Snapshot of the active groups, sorted
    pub async fn active_groups(&self) -> MergeResult<Vec<String>> {
        let reply = self
            .store
            .execute(StoreCommand::SMembers {
                key: self.keys.merges_key(),
            })
            .await?;
        let mut groups = reply.into_strings()?;
        groups.sort();
        debug!(count = groups.len(), "listed active groups");
        Ok(groups)
    }

    /// Remove a group from the active set, leaving its data alone
    pub async fn forget_group(&self, group: &str) -> MergeResult<()> {
        let mut tx = Transaction::new();
        self.queue_forget(&mut tx, group);
        self.commit(tx).await
    }

    pub(super) fn record_command(&self, group: &str) -> StoreCommand {
        StoreCommand::SAdd {
            key: self.keys.merges_key(),
            member: group.to_string(),
        }
    }

    pub(super) fn queue_forget(&self, tx: &mut Transaction, group: &str) {
        tx.queue(StoreCommand::SRem {
            key: self.keys.merges_key(),
            member: group.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::keys::KeySpace;
    use crate::merge::MergeBuffer;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_record_list_forget() {
        let buffer = MergeBuffer::with_keyspace(InMemoryStore::new(), KeySpace::new("t").unwrap());
        buffer.record_group("b").await.unwrap();
        buffer.record_group("a").await.unwrap();
        buffer.record_group("a").await.unwrap();
        assert_eq!(buffer.active_groups().await.unwrap(), vec!["a", "b"]);

        buffer.forget_group("a").await.unwrap();
        assert_eq!(buffer.active_groups().await.unwrap(), vec!["b"]);

        buffer.forget_group("missing").await.unwrap();
        assert_eq!(buffer.active_groups().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let buffer = MergeBuffer::with_keyspace(InMemoryStore::new(), KeySpace::new("t").unwrap());
        assert!(buffer.active_groups().await.unwrap().is_empty());
    }
}
