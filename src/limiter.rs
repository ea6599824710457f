//! Dual-tier sliding-window rate limiting.
//!
//! Every identifier is checked against two windows: a short **burst** window
//! (default 10 requests per second) and a long **sustained** window (default
//! 100 requests per minute). Burst is checked first. The first denial ends the
//! request; later tiers and identifiers are not consumed.
//!
//! # Store Failover
//!
//! ```text
//! admit ──► shared store (timeout-bounded) ──ok──► outcome
//!                │
//!                └─error/timeout──► in-memory fallback ──► outcome
//!                                   (rest of this request stays local)
//! ```
//!
//! The limiter fails open onto the fallback: a request is never blocked just
//! because Redis is down. With several processes the effective limit then
//! becomes per-process until the shared store returns.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::GateError;
use crate::identity::Identifier;
use crate::metrics;
use crate::store::{CounterStore, MemoryCounterStore, StoreError, WindowOutcome};

/// Rate limit tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Burst,
    Sustained,
}

impl Tier {
    /// Evaluation order for one identifier.
    pub const ORDER: [Tier; 2] = [Tier::Burst, Tier::Sustained];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Burst => "burst",
            Tier::Sustained => "sustained",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit and window length of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimit {
    pub limit: u64,
    pub window_secs: u64,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub sustained: TierLimit,
    pub burst: TierLimit,
    /// Upper bound on any single shared store call.
    pub store_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sustained: TierLimit {
                limit: 100,
                window_secs: 60,
            },
            burst: TierLimit {
                limit: 10,
                window_secs: 1,
            },
            store_timeout: Duration::from_millis(250),
        }
    }
}

impl RateLimitConfig {
    pub fn tier(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Burst => self.burst,
            Tier::Sustained => self.sustained,
        }
    }
}

/// Store key of one (tier, identifier) window, before any backend prefix.
pub fn window_key(tier: Tier, identifier: &Identifier) -> String {
    format!("{tier}:{identifier}")
}

/// Which window denied a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub tier: Tier,
    pub identifier: Identifier,
}

/// Result of [`RateLimiter::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Seconds until a slot frees up; zero when allowed.
    pub retry_after_secs: u64,
    pub remaining: u64,
    pub limit: u64,
    /// Unix second at which the reported quota resets.
    pub reset_epoch: u64,
    pub denied: Option<Denial>,
}

impl Decision {
    fn allowed(remaining: u64, limit: u64, reset_epoch: u64) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            remaining,
            limit,
            reset_epoch,
            denied: None,
        }
    }

    fn denied(denial: Denial, retry_after_secs: u64, limit: u64, now: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
            remaining: 0,
            limit,
            reset_epoch: epoch_secs(now).saturating_add(retry_after_secs),
            denied: Some(denial),
        }
    }

    /// The rejection to send, if this decision is a denial.
    pub fn to_error(&self) -> Option<GateError> {
        let denial = self.denied.as_ref()?;
        Some(GateError::RateLimited {
            tier: denial.tier,
            retry_after: self.retry_after_secs,
            limit: self.limit,
            reset_epoch: self.reset_epoch,
        })
    }
}

/// Seconds until the oldest entry leaves the window, at least 1.
///
/// Without an oldest entry the whole window length is reported.
pub fn retry_after_secs(oldest: Option<f64>, window_secs: u64, now: f64) -> u64 {
    let Some(oldest) = oldest else {
        return window_secs.max(1);
    };

    let secs = (oldest + window_secs as f64 - now).ceil();
    if secs.is_finite() && secs >= 1.0 {
        secs as u64
    } else {
        1
    }
}

fn epoch_secs(now: f64) -> u64 {
    if now.is_finite() && now > 0.0 {
        now as u64
    } else {
        0
    }
}

/// Sliding-window rate limiter over a shared store with in-memory fallback.
pub struct RateLimiter {
    config: RateLimitConfig,
    shared: Option<Arc<dyn CounterStore>>,
    fallback: Arc<MemoryCounterStore>,
    clock: Arc<dyn Clock>,
    /// Set while the shared store is failing; flips log once per outage.
    degraded: AtomicBool,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("shared", &self.shared.as_ref().map(|s| s.backend()))
            .field("fallback_buckets", &self.fallback.len())
            .field("degraded", &self.degraded.load(Ordering::Relaxed))
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter. With `shared = None` every window lives in memory.
    pub fn new(config: RateLimitConfig, shared: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            config,
            shared,
            fallback: Arc::new(MemoryCounterStore::new()),
            clock: Arc::new(SystemClock),
            degraded: AtomicBool::new(false),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// In-memory windows, used directly when no shared store is configured.
    pub fn fallback(&self) -> &Arc<MemoryCounterStore> {
        &self.fallback
    }

    /// Name of the primary backend.
    pub fn backend(&self) -> &'static str {
        self.shared
            .as_ref()
            .map_or_else(|| self.fallback.backend(), |s| s.backend())
    }

    /// Shared store availability, or `None` when running memory-only.
    ///
    /// A store that timed out on its last call reports itself available;
    /// the degraded flag covers that case.
    pub fn shared_available(&self) -> Option<bool> {
        self.shared
            .as_ref()
            .map(|s| s.is_available() && !self.is_degraded())
    }

    /// Whether the shared store is currently being bypassed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Check and consume every tier for every identifier.
    ///
    /// Identifiers are evaluated in order, burst before sustained. The first
    /// denial returns immediately. On admission the reported quota is the
    /// smallest sustained-tier remainder across identifiers.
    pub async fn admit(&self, identifiers: &[Identifier]) -> Decision {
        let now = self.clock.now_secs();
        let sustained = self.config.sustained;
        let mut use_shared = self.shared.is_some();

        for identifier in identifiers {
            for tier in Tier::ORDER {
                let limit = self.config.tier(tier);
                let key = window_key(tier, identifier);
                let outcome = self.check_and_consume(&mut use_shared, &key, limit, now).await;

                if !outcome.allowed {
                    let retry_after = retry_after_secs(outcome.oldest, limit.window_secs, now);
                    debug!(
                        identifier = %identifier,
                        tier = %tier,
                        count = outcome.count,
                        retry_after,
                        "Rate limit window full"
                    );
                    let denial = Denial {
                        tier,
                        identifier: identifier.clone(),
                    };
                    return Decision::denied(denial, retry_after, limit.limit, now);
                }
            }
        }

        let mut remaining = sustained.limit;
        for identifier in identifiers {
            let key = window_key(Tier::Sustained, identifier);
            let count = self
                .count(&mut use_shared, &key, sustained.window_secs, now)
                .await;
            remaining = remaining.min(sustained.limit.saturating_sub(count));
        }

        Decision::allowed(
            remaining,
            sustained.limit,
            epoch_secs(now).saturating_add(sustained.window_secs),
        )
    }

    /// Drop idle fallback buckets. Returns how many were removed.
    pub fn sweep_fallback(&self) -> usize {
        self.fallback.sweep(self.clock.now_secs())
    }

    /// Close the shared store and clear the fallback.
    pub async fn close(&self) {
        if let Some(shared) = &self.shared {
            shared.close().await;
        }
        self.fallback.close().await;
    }

    async fn check_and_consume(
        &self,
        use_shared: &mut bool,
        key: &str,
        limit: TierLimit,
        now: f64,
    ) -> WindowOutcome {
        if *use_shared && let Some(shared) = &self.shared {
            let call = shared.check_and_consume(key, limit.limit, limit.window_secs, now);
            match self.call_shared("check_and_consume", call).await {
                Ok(outcome) => return outcome,
                Err(_) => *use_shared = false,
            }
        }
        self.fallback.consume(key, limit.limit, limit.window_secs, now)
    }

    async fn count(&self, use_shared: &mut bool, key: &str, window_secs: u64, now: f64) -> u64 {
        if *use_shared && let Some(shared) = &self.shared {
            match self.call_shared("count", shared.count(key, window_secs, now)).await {
                Ok(count) => return count,
                Err(_) => *use_shared = false,
            }
        }
        self.fallback.current(key, window_secs, now)
    }

    async fn call_shared<T, F>(&self, op: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        let result = match timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        };
        metrics::record_store_duration(op, started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.on_store_success(),
            Err(e) => self.on_store_failure(op, e),
        }
        result
    }

    fn on_store_success(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!(
                backend = self.backend(),
                "Shared counter store recovered, resuming distributed rate limiting"
            );
            metrics::set_store_available(true);
        }
    }

    fn on_store_failure(&self, op: &'static str, err: &StoreError) {
        metrics::record_store_fallback(err.reason());

        if self.degraded.swap(true, Ordering::AcqRel) {
            debug!(op, error = %err, "Shared counter store still unavailable");
        } else {
            warn!(
                op,
                error = %err,
                kind = "store_unavailable",
                "Shared counter store unavailable, falling back to in-memory rate limiting"
            );
            metrics::set_store_available(false);
        }
    }
}
