use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of monotonic time for the interval gate.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests and dry runs.
///
/// Clones share the same time. With a non-zero step, every `now()` call moves
/// time forward by that step after reading it.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
    step: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_step(Duration::ZERO)
    }

    pub fn with_step(step: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
            step,
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(mut now) => {
                let current = *now;
                *now += self.step;
                current
            }
            // a poisoned clock only happens after a test panic
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
