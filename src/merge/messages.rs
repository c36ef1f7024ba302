//! Message store: per-group message list plus its dedup set
//!
//! The list holds every push, newest first, duplicates included. The dedup
//! set holds each distinct encoded message once and answers `exists`.

use super::{decode_all, encode, MergeBuffer};
use crate::error::MergeResult;
use crate::store::{MergeStore, StoreCommand, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

impl<S: MergeStore> MergeBuffer<S> {
    /// Queue `message` in `group`.
    ///
    /// Registers the group, sets its scheduled time if it has none yet,
    /// prepends the message and adds it to the dedup set, all in one
    /// transaction. A later push never moves the scheduled time.
    pub async fn push<M: Serialize + ?Sized>(
        &self,
        group: &str,
        message: &M,
        scheduled_time: i64,
    ) -> MergeResult<()> {
        let encoded = encode(message)?;

        let mut tx = Transaction::new();
        tx.queue(self.record_command(group));
        tx.queue(StoreCommand::SetNx {
            key: self.keys.time_key(group),
            value: scheduled_time.to_string(),
        });
        tx.queue(StoreCommand::LPush {
            key: self.keys.msg_key(group),
            value: encoded.clone(),
        });
        tx.queue(StoreCommand::SAdd {
            key: self.keys.unique_msg_key(group),
            member: encoded,
        });
        self.commit(tx).await?;

        debug!(group, scheduled_time, "pushed message");
        Ok(())
    }

    /// Drop `message` from the dedup set and every copy of it from the list
    pub async fn remove<M: Serialize + ?Sized>(&self, group: &str, message: &M) -> MergeResult<()> {
        let encoded = encode(message)?;

        let mut tx = Transaction::new();
        tx.queue(StoreCommand::SRem {
            key: self.keys.unique_msg_key(group),
            member: encoded.clone(),
        });
        let removed = tx.queue(StoreCommand::LRem {
            key: self.keys.msg_key(group),
            count: 0,
            value: encoded,
        });
        self.commit(tx).await?;

        let removed = removed.try_take().map(|r| r.into_integer()).transpose()?;
        debug!(group, ?removed, "removed message");
        Ok(())
    }

    /// Whether `message` is in the group's dedup set
    pub async fn exists<M: Serialize + ?Sized>(&self, group: &str, message: &M) -> MergeResult<bool> {
        let reply = self
            .store
            .execute(StoreCommand::SIsMember {
                key: self.keys.unique_msg_key(group),
                member: encode(message)?,
            })
            .await?;
        Ok(reply.into_bool()?)
    }

    /// Number of queued entries, duplicates included
    pub async fn size(&self, group: &str) -> MergeResult<u64> {
        let reply = self
            .store
            .execute(StoreCommand::LLen {
                key: self.keys.msg_key(group),
            })
            .await?;
        Ok(reply.into_integer()?.max(0) as u64)
    }

    /// Queued messages, newest first, without consuming them
    pub async fn peek<T: DeserializeOwned>(&self, group: &str) -> MergeResult<Vec<T>> {
        let reply = self
            .store
            .execute(StoreCommand::LRange {
                key: self.keys.msg_key(group),
                start: 0,
                stop: -1,
            })
            .await?;
        decode_all(group, reply.into_strings()?)
    }

    /// Take every queued message and clear the group, in one transaction.
    ///
    /// The lock is left in place. Draining an absent group returns an empty
    /// batch.
    pub async fn drain<T: DeserializeOwned>(&self, group: &str) -> MergeResult<Vec<T>> {
        let mut tx = Transaction::new();
        let messages = tx.queue(StoreCommand::LRange {
            key: self.keys.msg_key(group),
            start: 0,
            stop: -1,
        });
        tx.queue(StoreCommand::Del {
            keys: vec![
                self.keys.unique_msg_key(group),
                self.keys.msg_key(group),
                self.keys.time_key(group),
            ],
        });
        self.queue_forget(&mut tx, group);
        self.commit(tx).await?;

        let raw = messages.resolve(self.resolve).await?.into_strings()?;
        info!(group, count = raw.len(), "drained merge group");
        decode_all(group, raw)
    }

    /// Discard the group entirely, lock included
    pub async fn cancel(&self, group: &str) -> MergeResult<()> {
        let mut tx = Transaction::new();
        tx.queue(StoreCommand::Del {
            keys: vec![
                self.keys.unique_msg_key(group),
                self.keys.msg_key(group),
                self.keys.time_key(group),
                self.keys.lock_key(group),
            ],
        });
        self.queue_forget(&mut tx, group);
        self.commit(tx).await?;

        info!(group, "canceled merge group");
        Ok(())
    }
}
