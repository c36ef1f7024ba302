//! Scheduled flush time and the per-group drain lock

use super::MergeBuffer;
use crate::error::{MergeError, MergeResult};
use crate::store::{MergeStore, StoreCommand};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const LOCK_VALUE: &str = "1";

/// Largest PX Redis accepts
const MAX_TTL_MS: u64 = i64::MAX as u64;

impl<S: MergeStore> MergeBuffer<S> {
    /// The time set by the group's first push, if it has one
    pub async fn scheduled_time(&self, group: &str) -> MergeResult<Option<i64>> {
        let reply = self
            .store
            .execute(StoreCommand::Get {
                key: self.keys.time_key(group),
            })
            .await?;

        match reply.into_optional_string()? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| MergeError::InvalidTimestamp {
                    group: group.to_string(),
                    raw,
                }),
        }
    }

    /// The scheduled time read as Unix seconds
    pub async fn scheduled_at(&self, group: &str) -> MergeResult<Option<SystemTime>> {
        Ok(self.scheduled_time(group).await?.and_then(|secs| {
            let offset = Duration::from_secs(secs.unsigned_abs());
            if secs >= 0 {
                UNIX_EPOCH.checked_add(offset)
            } else {
                UNIX_EPOCH.checked_sub(offset)
            }
        }))
    }

    /// Try to take the group's lock for `ttl`.
    ///
    /// Returns `false` if another holder's lock has not expired. A `ttl` under
    /// one millisecond or above `i64::MAX` milliseconds is rejected. There is no
    /// unlock: the lock lapses after `ttl` or is removed by `cancel`.
    pub async fn try_lock(&self, group: &str, ttl: Duration) -> MergeResult<bool> {
        let ttl_ms = u64::try_from(ttl.as_millis())
            .ok()
            .filter(|ms| (1..=MAX_TTL_MS).contains(ms))
            .ok_or(MergeError::InvalidTtl(ttl))?;

        let acquired = self
            .store
            .execute(StoreCommand::SetNxPx {
                key: self.keys.lock_key(group),
                value: LOCK_VALUE.to_string(),
                ttl_ms,
            })
            .await?
            .into_set_flag()?;

        debug!(group, acquired, ?ttl, "lock attempt");
        Ok(acquired)
    }

    /// Remaining lifetime of the group's lock, `None` when unlocked
    pub async fn lock_ttl(&self, group: &str) -> MergeResult<Option<Duration>> {
        let remaining = self
            .store
            .execute(StoreCommand::PTtl {
                key: self.keys.lock_key(group),
            })
            .await?
            .into_integer()?;

        // -2: no key, -1: key without expiry (not written by try_lock)
        Ok(match remaining {
            -2 => None,
            -1 => Some(Duration::MAX),
            ms => Some(Duration::from_millis(ms.max(0) as u64)),
        })
    }
}
