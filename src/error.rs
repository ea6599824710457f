use std::fmt;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::limiter::Tier;

/// Application-level errors raised while configuring and starting the service.
///
/// Request rejections use [`GateError`]; this type never describes a client
/// mistake.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Counter store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Which rule a path parameter broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathParamKind {
    /// A 36-character `*id*` parameter that is not canonical UUID text.
    Uuid,
    /// A `*slug*` parameter that is not lowercase words joined by hyphens.
    Slug,
    /// Any other parameter matching an injection pattern (strict mode only).
    Injection,
}

impl fmt::Display for PathParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathParamKind::Uuid => write!(f, "uuid"),
            PathParamKind::Slug => write!(f, "slug"),
            PathParamKind::Injection => write!(f, "injection"),
        }
    }
}

/// Every way the admission layer can refuse a request.
///
/// The coordinator branches on the variant; nothing in the gate uses panics
/// or early-return exceptions for control flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Rate limit exceeded on {tier} tier, retry after {retry_after}s")]
    RateLimited {
        tier: Tier,
        retry_after: u64,
        limit: u64,
        reset_epoch: u64,
    },

    #[error("Request headers too large")]
    HeaderTooLarge,

    #[error("Invalid header value for {0}")]
    HeaderMalicious(String),

    #[error("Query string too long")]
    QueryTooLong,

    #[error("Potentially malicious query parameters detected")]
    QueryMalicious,

    #[error("Invalid path parameter {name} ({kind})")]
    PathParamInvalid { name: String, kind: PathParamKind },

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("Malformed request body: {0}")]
    BodyMalformed(String),

    #[error("JSON structure too deep")]
    BodyTooDeep,

    #[error("Counter store unavailable (recovered: {recovered})")]
    StoreUnavailable { recovered: bool },
}

impl GateError {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::HeaderTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            GateError::QueryTooLong => StatusCode::URI_TOO_LONG,
            GateError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::HeaderMalicious(_)
            | GateError::QueryMalicious
            | GateError::PathParamInvalid { .. }
            | GateError::BodyMalformed(_)
            | GateError::BodyTooDeep => StatusCode::BAD_REQUEST,
            GateError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable error code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::RateLimited { .. } => "rate_limit_exceeded",
            GateError::StoreUnavailable { .. } => "service_unavailable",
            _ => "validation_error",
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::RateLimited { .. } => "rate_limited",
            GateError::HeaderTooLarge => "header_too_large",
            GateError::HeaderMalicious(_) => "header_malicious",
            GateError::QueryTooLong => "query_too_long",
            GateError::QueryMalicious => "query_malicious",
            GateError::PathParamInvalid { .. } => "path_param_invalid",
            GateError::BodyTooLarge => "body_too_large",
            GateError::BodyMalformed(_) => "body_malformed",
            GateError::BodyTooDeep => "body_too_deep",
            GateError::StoreUnavailable { .. } => "store_unavailable",
        }
    }

    /// Message shown to clients.
    fn client_message(&self) -> String {
        match self {
            GateError::RateLimited {
                tier: Tier::Burst, ..
            } => "Too many requests in a short period. Please slow down.".to_string(),
            GateError::RateLimited { .. } => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            GateError::PathParamInvalid {
                name,
                kind: PathParamKind::Uuid,
            } => format!("Invalid UUID format for {name}"),
            GateError::PathParamInvalid {
                name,
                kind: PathParamKind::Slug,
            } => format!("Invalid slug format for {name}"),
            GateError::PathParamInvalid {
                name,
                kind: PathParamKind::Injection,
            } => format!("Potentially malicious path parameter: {name}"),
            GateError::StoreUnavailable { .. } => {
                "Service is temporarily unavailable. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Error response body for rejected requests.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            GateError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code(),
            message: self.client_message(),
            retry_after,
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let GateError::RateLimited {
            retry_after,
            limit,
            reset_epoch,
            ..
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(retry_after));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            headers.insert("x-ratelimit-reset", HeaderValue::from(reset_epoch));
        }

        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side but only expose a generic message
        tracing::error!(error = %self, "Request failed");

        let (error, message) = match &self {
            AppError::ConfigError(_) => (
                "config_error",
                "Service configuration error. Please contact support.",
            ),
            AppError::Store(_) => (
                "service_unavailable",
                "Service is temporarily unavailable. Please try again later.",
            ),
            AppError::Internal(_) => (
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
        };

        let status = match &self {
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error,
            message: message.to_string(),
            retry_after: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
