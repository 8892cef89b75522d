//! Time sources for the poll loop.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Abstraction over a time source so tests can drive timeouts without
/// sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Lets liveness and timeout tests run
/// instantly instead of sleeping through real seconds.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a manual clock starting at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self { current: Mutex::new(start) }
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut current = self.current.lock().expect("clock mutex poisoned");
        *current += step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().expect("clock mutex poisoned")
    }
}
