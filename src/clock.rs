//! Monotonic time source for the round engine.
//!
//! Every phase boundary and every cut-instant comparison reads the same
//! [`Clock`]. Readings are offsets from the clock's own epoch, so they are only
//! comparable within one process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Authoritative time source shared by the scheduler and the ledger
pub trait Clock: Send + Sync {
    /// Monotonic reading since the clock's epoch
    fn now(&self) -> Duration;
}

/// Wall-independent clock backed by [`Instant`]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute reading. Going backwards is ignored.
    pub fn set(&self, to: Duration) {
        self.micros.fetch_max(to.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
