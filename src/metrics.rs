//! Prometheus metrics for the admission layer.
//!
//! Metrics are exposed by the Prometheus exporter's own HTTP listener on
//! `METRICS_PORT`, separate from the API port.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `admission_requests_total` - Requests seen (label: outcome =
//!   bypassed | admitted | rate_limited | rejected)
//! - `admission_rate_limited_total` - Denials (labels: tier, dimension)
//! - `admission_validation_rejections_total` - Gate rejections (label: kind)
//! - `admission_validation_warnings_total` - Lenient-mode or log-only findings
//!   (label: category)
//! - `admission_store_fallbacks_total` - Shared store calls answered by the
//!   in-memory fallback (label: reason = error | timeout | closed)
//!
//! ## Histograms
//! - `admission_store_duration_seconds` - Shared store call latency (label: op)
//!
//! ## Gauges
//! - `admission_store_available` - 1 when the last shared store call succeeded
//!
//! Recording before [`init_metrics`] is a no-op, so unit tests need no setup.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "admission_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "admission_rate_limited_total";
    pub const VALIDATION_REJECTIONS_TOTAL: &str = "admission_validation_rejections_total";
    pub const VALIDATION_WARNINGS_TOTAL: &str = "admission_validation_warnings_total";
    pub const STORE_FALLBACKS_TOTAL: &str = "admission_store_fallbacks_total";
    pub const STORE_DURATION_SECONDS: &str = "admission_store_duration_seconds";
    pub const STORE_AVAILABLE: &str = "admission_store_available";
}

/// Final state of a request in the admission pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Bypassed,
    Admitted,
    RateLimited,
    Rejected,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Bypassed => "bypassed",
            Outcome::Admitted => "admitted",
            Outcome::RateLimited => "rate_limited",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (for example when
/// the port is already bound or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests processed by the admission layer, by outcome"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests denied by the rate limiter, by tier and dimension"
    );
    describe_counter!(
        names::VALIDATION_REJECTIONS_TOTAL,
        "Requests rejected by the validation gate, by kind"
    );
    describe_counter!(
        names::VALIDATION_WARNINGS_TOTAL,
        "Suspicious input logged without rejecting, by category"
    );
    describe_counter!(
        names::STORE_FALLBACKS_TOTAL,
        "Counter store calls served by the in-memory fallback"
    );

    describe_histogram!(
        names::STORE_DURATION_SECONDS,
        "Shared counter store call duration in seconds"
    );

    describe_gauge!(
        names::STORE_AVAILABLE,
        "Shared counter store availability (1 = available, 0 = degraded)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_outcome(outcome: Outcome) {
    counter!(names::REQUESTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_rate_limited(tier: &'static str, dimension: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "tier" => tier, "dimension" => dimension).increment(1);
}

pub fn record_validation_rejection(kind: &'static str) {
    counter!(names::VALIDATION_REJECTIONS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_validation_warning(category: &'static str) {
    counter!(names::VALIDATION_WARNINGS_TOTAL, "category" => category).increment(1);
}

pub fn record_store_fallback(reason: &'static str) {
    counter!(names::STORE_FALLBACKS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_store_duration(op: &'static str, duration_secs: f64) {
    histogram!(names::STORE_DURATION_SECONDS, "op" => op).record(duration_secs);
}

pub fn set_store_available(available: bool) {
    gauge!(names::STORE_AVAILABLE).set(if available { 1.0 } else { 0.0 });
}
