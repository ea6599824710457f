//! HTTP middleware.
//!
//! - **Admission**: identity resolution, dual-tier rate limiting and input
//!   validation in a single route layer
//!
//! # Architecture
//!
//! ```text
//! Request → Admission (429 / 4xx) → Handler → quota + security headers
//! ```

pub mod admission;

pub use admission::{
    AdmissionConfig, AdmissionLayer, AdmissionPipeline, AdmissionService,
    DEFAULT_RATE_LIMIT_SKIP_PATHS, DEFAULT_VALIDATION_SKIP_PATHS, apply_quota_headers,
};
