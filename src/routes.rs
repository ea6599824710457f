//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Body Size Limit  │ ← Caps extractor buffering
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │    Admission     │ ← 429 when over quota, 4xx when validation fails
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! Admission is a route layer: it only wraps matched routes, which gives it
//! access to the path parameters. Unmatched paths fall through to the
//! default 404 without consuming quota.
//!
//! # Route Groups
//!
//! - `/`, `/health`, `/ready` - Service info & monitoring
//! - `/api/v1/knowledge` - Knowledge items
//! - `/api/v1/categories` - Category lookup

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::AdmissionLayer;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);

    let admission = state.pipeline.config();
    info!(
        rate_limiting = admission.rate_limit_enabled,
        validation = admission.validation_enabled,
        strict = state.pipeline.validator().strict_mode(),
        backend = state.limiter().backend(),
        "Admission pipeline configured"
    );

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/knowledge", post(handlers::create_item))
        .route("/api/v1/knowledge/{item_id}", get(handlers::get_item))
        .route("/api/v1/categories/{slug}", get(handlers::get_category))
        .route_layer(AdmissionLayer::new(state.pipeline.clone()));

    // Applied bottom to top: the last layer added runs first
    router = router.layer(DefaultBodyLimit::max(config.max_body_bytes));
    router = router.layer(cors);
    router = router.layer(TraceLayer::new_for_http());

    router.with_state(state)
}

/// Quota headers browsers on other origins may read.
const EXPOSED_HEADERS: [HeaderName; 3] = [
    HeaderName::from_static("x-ratelimit-limit"),
    HeaderName::from_static("x-ratelimit-remaining"),
    HeaderName::from_static("x-ratelimit-reset"),
];

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin. Entries that are not valid header values are
/// skipped.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(EXPOSED_HEADERS);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(origins)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use crate::config::Config;

    #[tokio::test]
    async fn test_cors_echoes_configured_origin() {
        let config = Config {
            cors_allowed_origins: vec!["https://kb.example.com".to_string()],
            ..Config::default()
        };
        let state = AppState::new(config, None);
        let app = build_router(state.clone());

        let response = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://kb.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://kb.example.com"
        );
        let exposed = response
            .headers()
            .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
            .unwrap()
            .to_str()
            .unwrap();
        for name in ["x-ratelimit-limit", "x-ratelimit-remaining", "x-ratelimit-reset"] {
            assert!(exposed.contains(name), "{name} not exposed: {exposed}");
        }
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_route_is_plain_404() {
        let state = AppState::new(Config::default(), None);
        let app = build_router(state.clone());

        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        state.shutdown().await;
    }
}
