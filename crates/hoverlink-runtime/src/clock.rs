//! Time source for the control loop.
//!
//! [`SystemClock`] is the real thing; [`ManualClock`] only moves when told
//! to (or when slept on), which makes cadence tests deterministic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    slept: Duration,
    sleeps: u64,
}

/// Clock that advances only through [`ManualClock::advance`] and `sleep`.
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                slept: Duration::ZERO,
                sleeps: 0,
            })),
        }
    }

    /// Move time forward without counting it as sleep.
    pub fn advance(&self, by: Duration) {
        self.state.lock().elapsed += by;
    }

    /// Time since construction.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Total time spent in `sleep`.
    pub fn slept(&self) -> Duration {
        self.state.lock().slept
    }

    pub fn sleep_count(&self) -> u64 {
        self.state.lock().sleeps
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.elapsed += duration;
        state.slept += duration;
        state.sleeps += 1;
    }
}
