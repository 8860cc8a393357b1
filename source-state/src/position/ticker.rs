use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Handle to the repeating position tick
///
/// Owned by the engine state and only touched under its lock. Each start
/// gets a new generation; a tick callback that sees a different generation
/// belongs to a torn-down ticker and must exit. `start` on a running ticker
/// is a no-op.
#[derive(Debug, Default)]
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start ticking every `period`, calling `on_tick(generation)` until it
    /// returns false
    ///
    /// Returns false if a tick was already running or no tokio runtime is
    /// available.
    pub fn start<F>(&mut self, period: Duration, mut on_tick: F) -> bool
    where
        F: FnMut(u64) -> bool + Send + 'static,
    {
        if self.is_running() {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available; position tick not started");
            return false;
        };

        self.generation += 1;
        let generation = self.generation;

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                if !on_tick(generation) {
                    break;
                }
            }
            debug!(generation, "Position tick exited");
        });

        self.handle = Some(handle);
        debug!(generation, ?period, "Position tick started");
        true
    }

    /// Abort the running tick, if any
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(generation = self.generation, "Position tick stopped");
        }
    }

    /// Record that the tick task with `generation` is exiting on its own
    pub fn mark_exited(&mut self, generation: u64) {
        if generation == self.generation {
            self.handle = None;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
