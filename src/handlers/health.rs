//! Service banner, health, and readiness endpoints.
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 200 as long as requests can be admitted
//!
//! A shared counter store outage degrades health but never readiness: the
//! limiter keeps admitting traffic against its in-memory windows.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, ServiceInfo};
use crate::state::AppState;

/// `GET /` service banner.
#[instrument(skip(state))]
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.app_env.clone(),
    })
}

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "environment": "development",
///   "counter_store": "redis",
///   "counter_store_available": true,
///   "strict_validation": false,
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let limiter = state.limiter();
    let available = limiter.shared_available();

    Json(HealthResponse {
        status: if available == Some(false) {
            "degraded"
        } else {
            "healthy"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.app_env.clone(),
        counter_store: limiter.backend().to_string(),
        counter_store_available: available,
        strict_validation: state.pipeline.validator().strict_mode(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
#[instrument(skip(_state))]
pub async fn readiness_check(State(_state): State<AppState>) -> StatusCode {
    StatusCode::OK
}
