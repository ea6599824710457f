//! Wall-clock abstraction for sliding-window arithmetic.
//!
//! Window entries are scored with Unix time so that every process sharing the
//! counter store agrees on what "60 seconds ago" means. The engine reads time
//! through [`Clock`] so tests can drive windows deterministically with
//! [`ManualClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

/// Source of the current Unix time.
pub trait Clock: Send + Sync {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Duration;

    /// Current Unix time in fractional seconds (the score stored per event).
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let micros = Utc::now().timestamp_micros();
        Duration::from_micros(u64::try_from(micros).unwrap_or_default())
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start` (time since the Unix epoch).
    pub fn new(start: Duration) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(duration_to_micros(start))),
        }
    }

    /// Create a clock frozen at the given Unix second.
    pub fn at_epoch_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(duration_to_micros(by), Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Duration) {
        self.micros.store(duration_to_micros(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

fn duration_to_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
