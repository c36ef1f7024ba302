//! Deferred transaction replies
//!
//! A command queued inside a transaction has no reply until EXEC runs.
//! `Deferred` is the handle to that future reply; `resolve` polls it with a
//! short backoff and gives up after a bounded wait.

use super::Reply;
use crate::error::{MergeError, MergeResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long and how often to poll a deferred reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        ResolvePolicy {
            timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(1),
        }
    }
}

/// Handle to the reply of a queued transaction command
#[derive(Debug, Clone, Default)]
pub struct Deferred {
    slot: Arc<Mutex<Option<Reply>>>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fulfill(&self, reply: Reply) {
        *self.slot.lock() = Some(reply);
    }

    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn try_take(&self) -> Option<Reply> {
        self.slot.lock().take()
    }

    /// Wait for the reply, polling every `policy.backoff` until `policy.timeout`.
    pub async fn resolve(&self, policy: ResolvePolicy) -> MergeResult<Reply> {
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if let Some(reply) = self.try_take() {
                if polls > 0 {
                    debug!(polls, "deferred reply resolved after polling");
                }
                return Ok(reply);
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                warn!(?waited, polls, "deferred reply never resolved");
                return Err(MergeError::ResolveTimeout { waited });
            }

            polls += 1;
            tokio::time::sleep(policy.backoff.min(policy.timeout - waited)).await;
        }
    }
}
