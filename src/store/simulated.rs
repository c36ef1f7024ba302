//! Simulated Store with Fault Injection
//!
//! DST wrapper around any `MergeStore`. Faults are drawn from a seeded
//! ChaCha RNG so a failing run replays exactly from its seed.
//!
//! Fault kinds:
//! - unavailable: connection error before anything is applied
//! - timeout: timeout before anything is applied
//! - reply lost: the command or transaction is applied, then the reply is dropped

use super::{MergeStore, Reply, StoreCommand, Transaction};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::trace;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a connection failure before apply
    pub unavailable_prob: f64,
    /// Probability of a timeout before apply
    pub timeout_prob: f64,
    /// Probability of losing the reply of an applied write
    pub reply_lost_prob: f64,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            unavailable_prob: 0.01, // 1%
            timeout_prob: 0.005,    // 0.5%
            reply_lost_prob: 0.005, // 0.5%
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            unavailable_prob: 0.05,
            timeout_prob: 0.03,
            reply_lost_prob: 0.03,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            unavailable_prob: 0.0,
            timeout_prob: 0.0,
            reply_lost_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub commands: u64,
    pub transactions: u64,
    pub unavailable: u64,
    pub timeouts: u64,
    pub replies_lost: u64,
}

impl SimulatedStoreStats {
    pub fn faults(&self) -> u64 {
        self.unavailable + self.timeouts + self.replies_lost
    }
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Store wrapper that injects faults
pub struct SimulatedStore<S: MergeStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: MergeStore> SimulatedStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// The wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Roll for a fault that strikes before the store sees the request
    fn fault_before_apply(&self, what: &str) -> Option<StoreError> {
        let mut state = self.state.lock();
        if state.rng.gen::<f64>() < self.config.unavailable_prob {
            state.stats.unavailable += 1;
            trace!(what, "simulated connection failure");
            return Some(StoreError::Connection(format!("simulated failure on {}", what)));
        }
        if state.rng.gen::<f64>() < self.config.timeout_prob {
            state.stats.timeouts += 1;
            trace!(what, "simulated timeout");
            return Some(StoreError::Timeout(format!("simulated timeout on {}", what)));
        }
        None
    }

    fn reply_lost(&self) -> bool {
        let mut state = self.state.lock();
        let lost = state.rng.gen::<f64>() < self.config.reply_lost_prob;
        if lost {
            state.stats.replies_lost += 1;
        }
        lost
    }
}

impl<S: MergeStore + Clone> Clone for SimulatedStore<S> {
    fn clone(&self) -> Self {
        SimulatedStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: MergeStore> MergeStore for SimulatedStore<S> {
    fn execute<'a>(
        &'a self,
        command: StoreCommand,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Reply>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.commands += 1;
            if let Some(err) = self.fault_before_apply(command.name()) {
                return Err(err);
            }

            let read_only = command.is_read_only();
            let reply = self.inner_store.execute(command).await?;
            if !read_only && self.reply_lost() {
                return Err(StoreError::ReplyLost);
            }
            Ok(reply)
        })
    }

    fn execute_atomic<'a>(
        &'a self,
        transaction: Transaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().stats.transactions += 1;
            if let Some(err) = self.fault_before_apply("EXEC") {
                return Err(err);
            }

            self.inner_store.execute_atomic(transaction).await?;
            if self.reply_lost() {
                return Err(StoreError::ReplyLost);
            }
            Ok(())
        })
    }
}
