//! # kb_gate
//!
//! Request admission control for a multi-tenant knowledge-base API.
//!
//! Every matched request passes through one pipeline before it reaches a
//! handler:
//!
//! - **Identity**: client IP (proxy aware), hashed bearer token, optional
//!   method + path
//! - **Rate limiting**: burst and sustained sliding windows per identifier,
//!   shared across instances through Redis with an in-memory fallback
//! - **Validation**: size ceilings, injection pattern scans, path parameter
//!   format checks, JSON/form body inspection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trace → CORS → Body Limit → AdmissionLayer (route layer)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AdmissionPipeline                                          │
//! │    identity::resolve → RateLimiter::admit → Validator       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CounterStore: RedisCounterStore  ⇢  MemoryCounterStore     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kb_gate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, None);
//!     let app = build_router(state.clone());
//!
//!     // Serve `app`, then:
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! RATE_LIMIT_REQUESTS=100 RATE_LIMIT_BURST=10 REDIS_URL=redis://localhost:6379/0 cargo run
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use context::{RequestContext, RequestView};
pub use error::{AppError, AppResult, GateError};
pub use identity::Identifier;
pub use limiter::{Decision, RateLimiter, Tier};
pub use middleware::{AdmissionLayer, AdmissionPipeline};
pub use routes::build_router;
pub use state::AppState;
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};
pub use validation::Validator;
