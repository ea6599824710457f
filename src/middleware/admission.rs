//! Admission control middleware.
//!
//! Sequences identity resolution, rate limiting and input validation in front
//! of the wrapped handler:
//!
//! ```text
//! request ──► skip lists ──both──────────────────────────────► handler
//!                │
//!                ├─► resolve identifiers ─► limiter.admit ─denied─► 429
//!                │                              │
//!                │                           allowed
//!                │                              ▼
//!                └─────────────────────► buffer body ─► validate ─fail─► 4xx
//!                                                          │
//!                                                        pass
//!                                                          ▼
//!                                   handler ─► quota + security headers
//! ```
//!
//! Validation failures also carry the security headers, and the quota
//! headers when the limiter admitted the request.
//!
//! Apply with `Router::route_layer` so the matched path parameters are
//! available to the gate.
//!
//! # Skip Lists
//!
//! The rate limiting list is matched exactly: `/` bypasses only the root
//! path, not everything. The validation list is matched by prefix so that a
//! whole subtree (such as file uploads) can be exempted.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::context::{RequestContext, RequestView};
use crate::error::GateError;
use crate::identity::{self, IdentityConfig};
use crate::limiter::{Decision, RateLimiter};
use crate::metrics::{self, Outcome};
use crate::validation::{self, BodyKind, Validator};

/// Paths that never consume rate limit quota (exact match).
pub const DEFAULT_RATE_LIMIT_SKIP_PATHS: &[&str] =
    &["/health", "/", "/docs", "/openapi.json", "/redoc"];

/// Path prefixes the validation gate ignores.
pub const DEFAULT_VALIDATION_SKIP_PATHS: &[&str] = &[
    "/docs",
    "/openapi.json",
    "/redoc",
    "/health",
    "/api/v1/files/upload",
];

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub rate_limit_enabled: bool,
    pub validation_enabled: bool,
    pub identity: IdentityConfig,
    pub rate_limit_skip_paths: Vec<String>,
    pub validation_skip_paths: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            validation_enabled: true,
            identity: IdentityConfig::default(),
            rate_limit_skip_paths: to_owned(DEFAULT_RATE_LIMIT_SKIP_PATHS),
            validation_skip_paths: to_owned(DEFAULT_VALIDATION_SKIP_PATHS),
        }
    }
}

fn to_owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| (*p).to_string()).collect()
}

impl AdmissionConfig {
    pub fn skips_rate_limit(&self, path: &str) -> bool {
        self.rate_limit_skip_paths.iter().any(|p| p == path)
    }

    pub fn skips_validation(&self, path: &str) -> bool {
        self.validation_skip_paths
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }
}

/// Attach `X-RateLimit-*` headers for an admitted request.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_epoch),
    );
}

/// The admission pipeline shared by every request.
#[derive(Debug)]
pub struct AdmissionPipeline {
    config: AdmissionConfig,
    limiter: Arc<RateLimiter>,
    validator: Validator,
}

impl AdmissionPipeline {
    pub fn new(config: AdmissionConfig, limiter: Arc<RateLimiter>, validator: Validator) -> Self {
        Self {
            config,
            limiter,
            validator,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Run one request through the pipeline, calling `next` if admitted.
    ///
    /// # Errors
    ///
    /// Only errors from `next` are returned; rejections are responses.
    pub async fn handle<S>(&self, req: Request<Body>, mut next: S) -> Result<Response<Body>, S::Error>
    where
        S: Service<Request<Body>, Response = Response<Body>>,
    {
        let path = req.uri().path();
        let rate_applies = self.config.rate_limit_enabled && !self.config.skips_rate_limit(path);
        let validation_applies =
            self.config.validation_enabled && !self.config.skips_validation(path);

        if !rate_applies && !validation_applies {
            metrics::record_outcome(Outcome::Bypassed);
            return next.call(req).await;
        }

        let (mut parts, mut body) = req.into_parts();
        let path_params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(params) => params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        let mut ctx = RequestContext::from_parts(&parts, path_params, Bytes::new());

        let mut decision = None;
        if rate_applies {
            let identifiers = identity::resolve(&ctx, &self.config.identity);
            let admitted = self.limiter.admit(&identifiers).await;

            if let Some(err) = admitted.to_error() {
                return Ok(self.deny(&ctx, &admitted, err));
            }
            decision = Some(admitted);
        }

        if validation_applies {
            if BodyKind::of(&parts.method, &parts.headers).is_some() {
                let max = self.validator.config().max_body_bytes;
                match buffer_body(body, &parts.headers, max).await {
                    Ok(bytes) => {
                        body = Body::from(bytes.clone());
                        ctx = ctx.with_body(bytes);
                    }
                    Err(err) => return Ok(self.reject(&ctx, decision.as_ref(), err)),
                }
            }

            if let Err(err) = self.validator.validate(&ctx) {
                return Ok(self.reject(&ctx, decision.as_ref(), err));
            }
        }

        let mut response = next.call(Request::from_parts(parts, body)).await?;

        if let Some(decision) = &decision {
            apply_quota_headers(response.headers_mut(), decision);
        }
        if validation_applies {
            validation::apply_security_headers(response.headers_mut());
        }

        metrics::record_outcome(Outcome::Admitted);
        Ok(response)
    }

    fn deny(&self, ctx: &RequestContext, decision: &Decision, err: GateError) -> Response<Body> {
        let (tier, identifier, dimension) = match &decision.denied {
            Some(denial) => (
                denial.tier.as_str(),
                denial.identifier.to_string(),
                denial.identifier.dimension(),
            ),
            None => ("unknown", String::new(), "unknown"),
        };

        metrics::record_outcome(Outcome::RateLimited);
        metrics::record_rate_limited(tier, dimension);
        warn!(
            path = ctx.path(),
            method = %ctx.method(),
            client_ip = %identity::client_ip(ctx),
            kind = err.kind(),
            tier,
            identifier = %identifier,
            retry_after_secs = decision.retry_after_secs,
            "Rate limit exceeded"
        );

        err.into_response()
    }

    /// Validation failure response. The request already reached the gate, so
    /// it carries the security headers, plus quota headers when the limiter
    /// admitted it.
    fn reject(
        &self,
        ctx: &RequestContext,
        decision: Option<&Decision>,
        err: GateError,
    ) -> Response<Body> {
        metrics::record_outcome(Outcome::Rejected);
        metrics::record_validation_rejection(err.kind());
        warn!(
            path = ctx.path(),
            method = %ctx.method(),
            client_ip = %identity::client_ip(ctx),
            kind = err.kind(),
            strict = self.validator.strict_mode(),
            error = %err,
            "Input validation failed"
        );

        let mut response = err.into_response();
        if let Some(decision) = decision {
            apply_quota_headers(response.headers_mut(), decision);
        }
        validation::apply_security_headers(response.headers_mut());
        response
    }
}

/// Read the whole body, refusing more than `max` bytes.
async fn buffer_body(body: Body, headers: &HeaderMap, max: usize) -> Result<Bytes, GateError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > max as u64) {
        return Err(GateError::BodyTooLarge);
    }

    axum::body::to_bytes(body, max).await.map_err(|e| {
        debug!(error = %e, "Failed to buffer request body");
        GateError::BodyTooLarge
    })
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Tower layer running every request through an [`AdmissionPipeline`].
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    pipeline: Arc<AdmissionPipeline>,
}

impl AdmissionLayer {
    pub fn new(pipeline: Arc<AdmissionPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    pipeline: Arc<AdmissionPipeline>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = self.pipeline.clone();

        Box::pin(async move { pipeline.handle(req, inner).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::limiter::{RateLimitConfig, TierLimit};
    use crate::validation::ValidationConfig;
    use axum::Router;
    use axum::http::{Method, StatusCode};
    use axum::routing::{get, post};
    use tower::ServiceExt;

    fn pipeline(sustained: u64, strict_mode: bool) -> Arc<AdmissionPipeline> {
        let limiter = RateLimiter::new(
            RateLimitConfig {
                sustained: TierLimit {
                    limit: sustained,
                    window_secs: 60,
                },
                ..RateLimitConfig::default()
            },
            None,
        );
        let validator = Validator::new(ValidationConfig {
            strict_mode,
            ..ValidationConfig::default()
        });
        Arc::new(AdmissionPipeline::new(
            AdmissionConfig::default(),
            Arc::new(limiter),
            validator,
        ))
    }

    fn app(pipeline: Arc<AdmissionPipeline>) -> Router {
        Router::new()
            .route("/", get(|| async { "root" }))
            .route("/items/{item_id}", get(|| async { "item" }))
            .route("/items", post(|body: String| async move { body }))
            .route_layer(AdmissionLayer::new(pipeline))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_skip_list_matching() {
        let config = AdmissionConfig::default();

        assert!(config.skips_rate_limit("/"));
        assert!(config.skips_rate_limit("/health"));
        assert!(!config.skips_rate_limit("/health/live"));
        assert!(!config.skips_rate_limit("/api/v1/knowledge"));

        assert!(config.skips_validation("/health/live"));
        assert!(config.skips_validation("/api/v1/files/upload/abc"));
        assert!(!config.skips_validation("/"));
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_and_security_headers() {
        let response = app(pipeline(5, true))
            .oneshot(request(Method::GET, "/items/42"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_skip_listed_path_consumes_no_quota() {
        let pipeline = pipeline(5, true);
        let app = app(pipeline.clone());

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
        // "/" is only exempt from rate limiting; the gate still ran
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(pipeline.limiter().fallback().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_request_never_reaches_handler() {
        let app = app(pipeline(1, true));

        let first = app
            .clone()
            .oneshot(request(Method::GET, "/items/42"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request(Method::GET, "/items/42"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        assert!(!second.headers().contains_key("x-content-type-options"));
    }

    #[tokio::test]
    async fn test_rejection_after_admission_carries_quota_and_security_headers() {
        let pipeline = pipeline(5, true);
        let response = app(pipeline.clone())
            .oneshot(request(Method::GET, "/items/abc?q=%27%20OR%201%3D1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let headers = response.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "4");
        assert!(headers.contains_key("x-ratelimit-reset"));
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(pipeline.limiter().fallback().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_uuid_path_param_is_rejected() {
        let response = app(pipeline(5, false))
            .oneshot(request(
                Method::GET,
                "/items/550e8400-e29b-41d4-a716-44665544000Z",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_is_forwarded_after_validation() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"hello"}"#))
            .unwrap();

        let response = app(pipeline(5, true)).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"title":"hello"}"#);
    }

    #[tokio::test]
    async fn test_declared_oversized_body_is_rejected_before_reading() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));

        let err = buffer_body(Body::empty(), &headers, 10).await.unwrap_err();

        assert_eq!(err, GateError::BodyTooLarge);
    }
}
