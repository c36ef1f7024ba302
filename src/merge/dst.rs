//! Deterministic Simulation Testing for the merge buffer
//!
//! VOPR-style harness: a seeded workload of pushes, removes, drains,
//! cancels, lock attempts, clock jumps and purges runs against a
//! `SimulatedStore` that injects faults. A reference model tracks what the
//! store must contain, and after every operation the harness reads the
//! unfaulted inner store and checks:
//!
//! 1. The active registry is exactly the set of groups with state.
//! 2. Each group's list, size, dedup set and scheduled time match the model.
//! 3. A drain returns exactly the queued batch, newest first.
//! 4. A lock is granted iff no unexpired lock exists.
//! 5. No keys exist beyond what the model accounts for.
//!
//! Faults that strike before apply leave the model untouched. A lost reply
//! means the operation did apply; for a drain that batch is counted as lost
//! (the at-most-once window).

use super::MergeBuffer;
use crate::clock::{Clock, SimulatedClock};
use crate::error::{MergeError, StoreError};
use crate::keys::KeySpace;
use crate::store::{InMemoryStore, SimulatedStore, SimulatedStoreConfig, SimulatedStoreStats};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Configuration for merge buffer DST
#[derive(Debug, Clone)]
pub struct MergeDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of distinct group keys
    pub num_groups: usize,
    /// Number of distinct message values (small, so duplicates happen)
    pub num_values: u64,
    pub remove_prob: f64,
    pub drain_prob: f64,
    pub cancel_prob: f64,
    pub lock_prob: f64,
    pub advance_prob: f64,
    pub purge_prob: f64,
    /// Longest lock TTL drawn, in milliseconds
    pub max_lock_ttl_ms: u64,
    pub faults: SimulatedStoreConfig,
}

impl Default for MergeDSTConfig {
    fn default() -> Self {
        MergeDSTConfig {
            seed: 0,
            num_groups: 4,
            num_values: 8,
            remove_prob: 0.10,
            drain_prob: 0.12,
            cancel_prob: 0.03,
            lock_prob: 0.15,
            advance_prob: 0.10,
            purge_prob: 0.005,
            max_lock_ttl_ms: 5_000,
            faults: SimulatedStoreConfig::no_faults(),
        }
    }
}

impl MergeDSTConfig {
    pub fn new(seed: u64) -> Self {
        MergeDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Few groups, frequent drains and cancels
    pub fn high_churn(seed: u64) -> Self {
        MergeDSTConfig {
            seed,
            num_groups: 2,
            num_values: 4,
            remove_prob: 0.15,
            drain_prob: 0.25,
            cancel_prob: 0.08,
            lock_prob: 0.20,
            advance_prob: 0.10,
            purge_prob: 0.01,
            ..Default::default()
        }
    }

    /// Default workload with store faults
    pub fn with_faults(seed: u64) -> Self {
        MergeDSTConfig {
            seed,
            faults: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// High churn with high fault rates
    pub fn chaos(seed: u64) -> Self {
        MergeDSTConfig {
            faults: SimulatedStoreConfig::high_chaos(),
            ..Self::high_churn(seed)
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOp {
    Push { group: String, value: u64, scheduled_time: i64 },
    Remove { group: String, value: u64 },
    Drain { group: String },
    Cancel { group: String },
    TryLock { group: String, ttl_ms: u64 },
    AdvanceClock { ms: u64 },
    Purge,
}

/// Result of a merge DST run
#[derive(Debug, Clone)]
pub struct MergeDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub pushes: u64,
    pub removes: u64,
    pub drains: u64,
    pub cancels: u64,
    pub lock_attempts: u64,
    pub locks_acquired: u64,
    pub clock_advances: u64,
    pub purges: u64,
    /// Operations that failed before the store applied them
    pub failed_operations: u64,
    /// Operations applied whose reply was lost
    pub replies_lost: u64,
    /// Messages handed back by successful drains
    pub messages_delivered: u64,
    /// Messages removed by drains whose reply was lost
    pub messages_lost: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<MergeOp>,
}

impl MergeDSTResult {
    pub fn new(seed: u64) -> Self {
        MergeDSTResult {
            seed,
            total_operations: 0,
            pushes: 0,
            removes: 0,
            drains: 0,
            cancels: 0,
            lock_attempts: 0,
            locks_acquired: 0,
            clock_advances: 0,
            purges: 0,
            failed_operations: 0,
            replies_lost: 0,
            messages_delivered: 0,
            messages_lost: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (push:{}, remove:{}, drain:{}, cancel:{}, lock:{}/{}, advance:{}, purge:{}), \
             {} failed, {} replies lost, {} delivered, {} lost, {} violations",
            self.seed,
            self.total_operations,
            self.pushes,
            self.removes,
            self.drains,
            self.cancels,
            self.locks_acquired,
            self.lock_attempts,
            self.clock_advances,
            self.purges,
            self.failed_operations,
            self.replies_lost,
            self.messages_delivered,
            self.messages_lost,
            self.invariant_violations.len()
        )
    }
}

/// Expected state of one registered group
#[derive(Debug, Clone, Default)]
struct GroupModel {
    scheduled_time: i64,
    /// Newest first, duplicates included
    messages: Vec<u64>,
    unique: BTreeSet<u64>,
}

/// How a failed operation relates to the store's state
enum Applied {
    Yes,
    No,
}

fn classify(err: &MergeError) -> Result<Applied, String> {
    match err.store_error() {
        Some(StoreError::ReplyLost) => Ok(Applied::Yes),
        Some(e) if e.is_before_apply() => Ok(Applied::No),
        _ => Err(format!("unexpected error: {}", err)),
    }
}

type DSTStore = SimulatedStore<InMemoryStore<SimulatedClock>>;

/// DST harness for `MergeBuffer`
pub struct MergeDSTHarness {
    config: MergeDSTConfig,
    rng: ChaCha8Rng,
    clock: SimulatedClock,
    buffer: MergeBuffer<DSTStore>,
    /// Reads the inner store directly, bypassing faults
    checker: MergeBuffer<InMemoryStore<SimulatedClock>>,
    groups: BTreeMap<String, GroupModel>,
    /// Lock expiry per group, in clock milliseconds
    locks: BTreeMap<String, u64>,
    result: MergeDSTResult,
}

impl MergeDSTHarness {
    pub fn new(config: MergeDSTConfig) -> Self {
        let clock = SimulatedClock::new(1_700_000_000_000);
        let inner = InMemoryStore::with_clock(clock.clone());
        // different seed for the store
        let store = SimulatedStore::new(
            inner.clone(),
            config.seed.wrapping_add(1),
            config.faults.clone(),
        );
        let keys = KeySpace::default();

        MergeDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            buffer: MergeBuffer::with_keyspace(store, keys.clone()),
            checker: MergeBuffer::with_keyspace(inner, keys),
            clock,
            groups: BTreeMap::new(),
            locks: BTreeMap::new(),
            result: MergeDSTResult::new(config.seed),
            config,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(MergeDSTConfig::new(seed))
    }

    fn random_group(&mut self) -> String {
        format!("group:{}", self.rng.gen_range(0..self.config.num_groups))
    }

    fn random_value(&mut self) -> u64 {
        self.rng.gen_range(0..self.config.num_values)
    }

    fn now_ms(&self) -> u64 {
        self.clock.now().as_millis()
    }

    fn next_op(&mut self) -> MergeOp {
        let roll: f64 = self.rng.gen();
        let c = &self.config;
        let purge = c.purge_prob;
        let cancel = purge + c.cancel_prob;
        let drain = cancel + c.drain_prob;
        let remove = drain + c.remove_prob;
        let lock = remove + c.lock_prob;
        let advance = lock + c.advance_prob;

        if roll < purge {
            MergeOp::Purge
        } else if roll < cancel {
            MergeOp::Cancel {
                group: self.random_group(),
            }
        } else if roll < drain {
            MergeOp::Drain {
                group: self.random_group(),
            }
        } else if roll < remove {
            let group = self.random_group();
            // prefer a value that is actually queued
            let queued = self
                .groups
                .get(&group)
                .and_then(|g| (!g.messages.is_empty()).then(|| g.messages.clone()));
            let value = match queued {
                Some(messages) => messages[self.rng.gen_range(0..messages.len())],
                None => self.random_value(),
            };
            MergeOp::Remove { group, value }
        } else if roll < lock {
            let ttl_ms = self.rng.gen_range(1..=self.config.max_lock_ttl_ms);
            MergeOp::TryLock {
                group: self.random_group(),
                ttl_ms,
            }
        } else if roll < advance {
            MergeOp::AdvanceClock {
                ms: self.rng.gen_range(1..=2_000),
            }
        } else {
            let group = self.random_group();
            let value = self.random_value();
            let scheduled_time = (self.now_ms() / 1_000) as i64 + self.rng.gen_range(0..3_600);
            MergeOp::Push {
                group,
                value,
                scheduled_time,
            }
        }
    }

    async fn run_single_op(&mut self) {
        let op = self.next_op();
        self.result.last_op = Some(op.clone());
        self.result.total_operations += 1;

        let outcome = self.execute(&op).await;
        let outcome = match outcome {
            Ok(()) => self.check_invariants().await,
            Err(e) => Err(e),
        };

        if let Err(violation) = outcome {
            self.result.invariant_violations.push(format!(
                "Op #{}: {:?} - {}",
                self.result.total_operations, op, violation
            ));
        }
    }

    /// Note a failed operation; returns whether it was applied
    fn on_error(&mut self, err: &MergeError) -> Result<bool, String> {
        match classify(err)? {
            Applied::Yes => {
                self.result.replies_lost += 1;
                Ok(true)
            }
            Applied::No => {
                self.result.failed_operations += 1;
                Ok(false)
            }
        }
    }

    async fn execute(&mut self, op: &MergeOp) -> Result<(), String> {
        match op {
            MergeOp::Push {
                group,
                value,
                scheduled_time,
            } => {
                self.result.pushes += 1;
                let applied = match self.buffer.push(group, value, *scheduled_time).await {
                    Ok(()) => true,
                    Err(e) => self.on_error(&e)?,
                };
                if applied {
                    let model = self
                        .groups
                        .entry(group.clone())
                        .or_insert_with(|| GroupModel {
                            scheduled_time: *scheduled_time,
                            ..GroupModel::default()
                        });
                    model.messages.insert(0, *value);
                    model.unique.insert(*value);
                }
            }
            MergeOp::Remove { group, value } => {
                self.result.removes += 1;
                let applied = match self.buffer.remove(group, value).await {
                    Ok(()) => true,
                    Err(e) => self.on_error(&e)?,
                };
                if applied {
                    if let Some(model) = self.groups.get_mut(group) {
                        model.messages.retain(|v| v != value);
                        model.unique.remove(value);
                    }
                }
            }
            MergeOp::Drain { group } => {
                self.result.drains += 1;
                let expected = self
                    .groups
                    .get(group)
                    .map(|g| g.messages.clone())
                    .unwrap_or_default();
                match self.buffer.drain::<u64>(group).await {
                    Ok(batch) => {
                        if batch != expected {
                            return Err(format!(
                                "drain returned {:?}, expected {:?}",
                                batch, expected
                            ));
                        }
                        self.result.messages_delivered += batch.len() as u64;
                        self.groups.remove(group);
                    }
                    Err(e) => {
                        if self.on_error(&e)? {
                            self.result.messages_lost += expected.len() as u64;
                            self.groups.remove(group);
                        }
                    }
                }
            }
            MergeOp::Cancel { group } => {
                self.result.cancels += 1;
                let applied = match self.buffer.cancel(group).await {
                    Ok(()) => true,
                    Err(e) => self.on_error(&e)?,
                };
                if applied {
                    self.groups.remove(group);
                    self.locks.remove(group);
                }
            }
            MergeOp::TryLock { group, ttl_ms } => {
                self.result.lock_attempts += 1;
                let now = self.now_ms();
                let held = self.locks.get(group).is_some_and(|expiry| *expiry > now);
                let acquired = match self
                    .buffer
                    .try_lock(group, Duration::from_millis(*ttl_ms))
                    .await
                {
                    Ok(acquired) => {
                        if acquired == held {
                            return Err(format!(
                                "try_lock returned {} while lock held={}",
                                acquired, held
                            ));
                        }
                        acquired
                    }
                    Err(e) => self.on_error(&e)? && !held,
                };
                if acquired {
                    self.result.locks_acquired += 1;
                    self.locks.insert(group.clone(), now + ttl_ms);
                }
            }
            MergeOp::AdvanceClock { ms } => {
                self.result.clock_advances += 1;
                self.clock.advance_ms(*ms);
            }
            MergeOp::Purge => {
                self.result.purges += 1;
                let expected = self.expected_key_count();
                let applied = match self.buffer.purge().await {
                    Ok(deleted) => {
                        if deleted != expected as u64 {
                            return Err(format!(
                                "purge deleted {} keys, expected {}",
                                deleted, expected
                            ));
                        }
                        true
                    }
                    Err(e) => self.on_error(&e)?,
                };
                if applied {
                    self.groups.clear();
                    self.locks.clear();
                }
            }
        }
        Ok(())
    }

    /// Live keys the store should hold according to the model
    fn expected_key_count(&self) -> usize {
        let now = self.now_ms();
        let registry = usize::from(!self.groups.is_empty());
        // time key always, list and dedup set only while non-empty
        let group_keys: usize = self
            .groups
            .values()
            .map(|g| if g.messages.is_empty() { 1 } else { 3 })
            .sum();
        let locks = self.locks.values().filter(|expiry| **expiry > now).count();
        registry + group_keys + locks
    }

    /// Check invariants against the unfaulted store
    pub async fn check_invariants(&mut self) -> Result<(), String> {
        let now = self.now_ms();
        self.locks.retain(|_, expiry| *expiry > now);
        let checker = &self.checker;

        // Invariant 1: registry matches the groups with state
        let active = checker.active_groups().await.map_err(|e| e.to_string())?;
        let expected: Vec<String> = self.groups.keys().cloned().collect();
        if active != expected {
            return Err(format!("active groups {:?}, expected {:?}", active, expected));
        }

        // Invariant 2: per-group contents
        for (group, model) in &self.groups {
            let size = checker.size(group).await.map_err(|e| e.to_string())?;
            if size != model.messages.len() as u64 {
                return Err(format!(
                    "{}: size {} but model holds {}",
                    group,
                    size,
                    model.messages.len()
                ));
            }

            let peeked: Vec<u64> = checker.peek(group).await.map_err(|e| e.to_string())?;
            if peeked != model.messages {
                return Err(format!(
                    "{}: list {:?}, expected {:?}",
                    group, peeked, model.messages
                ));
            }

            let time = checker
                .scheduled_time(group)
                .await
                .map_err(|e| e.to_string())?;
            if time != Some(model.scheduled_time) {
                return Err(format!(
                    "{}: scheduled time {:?}, expected {}",
                    group, time, model.scheduled_time
                ));
            }

            for value in 0..self.config.num_values {
                let exists = checker.exists(group, &value).await.map_err(|e| e.to_string())?;
                if exists != model.unique.contains(&value) {
                    return Err(format!("{}: exists({}) = {}", group, value, exists));
                }
            }
        }

        // Invariant 4: model locks are live in the store
        for (group, expiry) in &self.locks {
            let ttl = checker.lock_ttl(group).await.map_err(|e| e.to_string())?;
            match ttl {
                Some(ttl) if ttl.as_millis() as u64 == expiry - now => {}
                other => {
                    return Err(format!(
                        "{}: lock ttl {:?}, expected {}ms",
                        group,
                        other,
                        expiry - now
                    ))
                }
            }
        }

        // Invariant 5: nothing else is stored
        let live = checker.store().key_count();
        let expected = self.expected_key_count();
        if live != expected {
            return Err(format!("{} live keys, expected {}", live, expected));
        }

        Ok(())
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op().await;
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
        self.result.store_stats = self.buffer.store().stats();
    }

    pub fn result(&self) -> &MergeDSTResult {
        &self.result
    }

    pub fn into_result(self) -> MergeDSTResult {
        self.result
    }
}

/// Run a batch of DST tests
pub async fn run_merge_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> MergeDSTConfig,
) -> Vec<MergeDSTResult> {
    let mut results = Vec::with_capacity(num_seeds);
    for i in 0..num_seeds {
        let seed = start_seed + i as u64;
        let mut harness = MergeDSTHarness::new(config_fn(seed));
        harness.run(ops_per_seed).await;
        results.push(harness.into_result());
    }
    results
}

/// Summarize batch results
pub fn summarize_merge_batch(results: &[MergeDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let delivered: u64 = results.iter().map(|r| r.messages_delivered).sum();
    let lost: u64 = results.iter().map(|r| r.messages_lost).sum();
    let faults: u64 = results.iter().map(|r| r.store_stats.faults()).sum();

    let mut summary = format!(
        "Merge DST Summary\n\
         =================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n\
         Messages delivered: {}, lost on reply: {}\n\
         Store faults: {}\n",
        total, passed, failed, total_ops, delivered, lost, faults
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  {}\n", result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merge_dst_single_seed() {
        let mut harness = MergeDSTHarness::with_seed(12345);
        harness.run(300).await;
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert_eq!(result.total_operations, 300);
        assert_eq!(result.messages_lost, 0);
        assert!(result.pushes > 0 && result.drains > 0);
    }

    #[tokio::test]
    async fn test_merge_dst_with_faults() {
        let mut harness = MergeDSTHarness::new(MergeDSTConfig::chaos(7));
        harness.run(500).await;
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(result.store_stats.faults() > 0);
    }

    #[tokio::test]
    async fn test_merge_dst_deterministic() {
        let mut first = MergeDSTHarness::new(MergeDSTConfig::with_faults(99));
        first.run(200).await;
        let mut second = MergeDSTHarness::new(MergeDSTConfig::with_faults(99));
        second.run(200).await;

        assert_eq!(first.result().summary(), second.result().summary());
        assert_eq!(first.result().store_stats, second.result().store_stats);
    }

    #[tokio::test]
    async fn test_merge_dst_10_seeds() {
        let results = run_merge_batch(0, 10, 200, MergeDSTConfig::new).await;
        let summary = summarize_merge_batch(&results);
        println!("{}", summary);
        assert!(results.iter().all(|r| r.is_success()), "{}", summary);
    }
}
