use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of "now" for position interpolation
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by tokio's time source
///
/// Follows tokio's paused time under `test-util`, so timer-driven tests stay
/// deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
