//! Shared application state for Axum handlers.
//!
//! Holds the admission pipeline (rate limiter + validator), configuration, and
//! the lifecycle of background tasks.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::metrics;
use crate::middleware::admission::AdmissionPipeline;
use crate::store::CounterStore;
use crate::validation::Validator;

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// The fallback sweep task is spawned when the state is created. Call
/// `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config, shared_store);
/// // ... serve ...
/// state.shutdown().await;  // Stops tasks and closes the counter store
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Admission pipeline shared with the middleware layer
    pub pipeline: Arc<AdmissionPipeline>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state.
    ///
    /// `shared` is the cross-process counter store; `None` keeps every window
    /// in memory.
    pub fn new(config: Config, shared: Option<Arc<dyn CounterStore>>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_config(), shared);
        Self::with_limiter(config, limiter)
    }

    /// Create application state around a prepared limiter (custom clock or
    /// store in tests).
    pub fn with_limiter(config: Config, limiter: RateLimiter) -> Self {
        let validator = Validator::new(config.validation_config());
        let pipeline = Arc::new(AdmissionPipeline::new(
            config.admission_config(),
            Arc::new(limiter),
            validator,
        ));

        let state = Self {
            pipeline,
            started_at: Instant::now(),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_sweep_task();

        state
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.pipeline.limiter()
    }

    /// Spawn the in-memory window sweep.
    ///
    /// Shared-store windows expire through key TTLs; in-memory ones only
    /// shrink when touched, so idle identifiers are dropped here. The same
    /// tick refreshes the store availability gauge.
    fn spawn_sweep_task(&self) {
        let limiter = self.pipeline.limiter().clone();
        let period = self.config.sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_fallback();
                        trace!(removed, "Fallback sweep tick");
                        if let Some(available) = limiter.shared_available() {
                            metrics::set_store_available(available);
                        }
                    }
                }
            }

            debug!("Sweep task shutting down");
        });
    }

    /// Gracefully shutdown background tasks and close the counter store.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    /// 4. Closes the counter stores
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.pipeline.limiter().close().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::Identifier;

    #[tokio::test]
    async fn test_sweep_task_drops_idle_windows() {
        let clock = ManualClock::at_epoch_secs(1_700_000_000);
        let config = Config {
            sweep_interval: Duration::from_millis(10),
            ..Config::default()
        };
        let limiter = RateLimiter::new(config.rate_limit_config(), None)
            .with_clock(Arc::new(clock.clone()));
        let state = AppState::with_limiter(config, limiter);

        state
            .limiter()
            .admit(&[Identifier::Ip("10.0.0.1".to_string())])
            .await;
        assert_eq!(state.limiter().fallback().len(), 2);

        clock.advance(Duration::from_secs(120));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(state.limiter().fallback().is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes() {
        let state = AppState::new(Config::default(), None);
        tokio::time::timeout(Duration::from_secs(1), state.shutdown())
            .await
            .expect("shutdown should not hang");
    }
}
