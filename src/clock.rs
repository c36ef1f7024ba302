//! Clocks for lock expiry
//!
//! The in-memory store checks TTLs against a `Clock`, so expiry can be
//! driven by hand in tests and replayed exactly in simulation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

pub trait Clock: Send + Sync + Clone + 'static {
    fn now(&self) -> Timestamp;
}

/// Wall clock, anchored to the epoch once and advanced monotonically
#[derive(Debug, Clone)]
pub struct ProductionClock {
    anchor: Instant,
    anchor_ms: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        // A system clock before the epoch counts from zero.
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ProductionClock {
            anchor: Instant::now(),
            anchor_ms,
        }
    }
}

impl Clock for ProductionClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.anchor_ms + self.anchor.elapsed().as_millis() as u64)
    }
}

/// Virtual clock that only moves on `advance`. Clones share one time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    now_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.advance_ms(by.as_millis() as u64);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn current_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.current_ms())
    }
}
