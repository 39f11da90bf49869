//! Clock abstraction used for every timestamp the engine records.

use crate::Time;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current timestamp.
    fn now(&self) -> Time;
}

/// Clock handle shared between a container and its trackers.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `chrono::Utc::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        chrono::Utc::now()
    }
}

/// Manually driven clock for deterministic timing.
///
/// Clones share the same underlying instant, so a test can hold one handle
/// and advance time seen by trackers holding another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Time>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let step = chrono::Duration::microseconds(by.as_micros() as i64);
        *self.now.lock() += step;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: Time) {
        *self.now.lock() = to;
    }

    /// Shared handle to this clock.
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(chrono::Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}
