//! Time sources
//!
//! Expiry checks for offers, nonces, and temporal locks all read the time
//! through [`Clock`] so tests can drive them deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::fmt;

/// Wall-clock time source
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replay
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Move the clock forward (or backward for negative durations)
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write();
        *current += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}
