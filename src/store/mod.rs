//! Sliding-window counter storage.
//!
//! A [`CounterStore`] owns the per-(identifier, tier) windows that the rate
//! limit engine consults. Two backends exist:
//!
//! - [`RedisCounterStore`]: shared across processes, one sorted set per key,
//!   check-and-consume executed as a single Lua script.
//! - [`MemoryCounterStore`]: process-local, one ordered deque per key behind
//!   the DashMap shard lock. Also serves as the automatic fallback.
//!
//! # Key Layout
//!
//! ```text
//! <prefix><tier>:<identifier>     e.g. rate_limit:burst:ip:10.0.0.1
//! ```
//!
//! The prefix is applied by the Redis backend only.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Failures of a counter store call.
///
/// The engine never surfaces these to clients; it falls back to the
/// in-memory store for the rest of the request.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store has been closed")]
    Closed,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Label for the fallback metric.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::Timeout(_) => "timeout",
            StoreError::Closed => "closed",
            StoreError::Redis(_) | StoreError::Unavailable(_) => "error",
        }
    }
}

/// Result of one atomic check-and-consume against a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowOutcome {
    /// Whether an entry was recorded.
    pub allowed: bool,
    /// Entries in the window after this call.
    pub count: u64,
    /// Score of the oldest entry still inside the window, if any.
    pub oldest: Option<f64>,
}

impl WindowOutcome {
    pub fn allowed(count: u64, oldest: Option<f64>) -> Self {
        Self {
            allowed: true,
            count,
            oldest,
        }
    }

    pub fn denied(count: u64, oldest: Option<f64>) -> Self {
        Self {
            allowed: false,
            count,
            oldest,
        }
    }
}

/// Atomic sliding-window counter operations.
///
/// Implementations must run [`check_and_consume`](CounterStore::check_and_consume)
/// as one atomic unit per key: prune entries with a score at or below
/// `now - window_secs`, read the cardinality, and only add `now` when the
/// cardinality is below `limit`. The key's idle expiry is `window_secs + 1`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;

    /// Prune, count, and record one event if under `limit`.
    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now: f64,
    ) -> Result<WindowOutcome, StoreError>;

    /// Prune and return the number of entries in the window without recording.
    async fn count(&self, key: &str, window_secs: u64, now: f64) -> Result<u64, StoreError>;

    /// Whether the last call to the backend succeeded.
    fn is_available(&self) -> bool;

    /// Release backend resources. Later calls fail with [`StoreError::Closed`]
    /// or, for the memory backend, start from empty windows.
    async fn close(&self);
}

/// Lower bound (inclusive) of scores that have left the window.
pub(crate) fn window_cutoff(now: f64, window_secs: u64) -> f64 {
    now - window_secs as f64
}
