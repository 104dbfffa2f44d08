//! Prometheus metrics for the security pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so tests and library users pay nothing.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `medops_security_events_total` - Security events (labels: event)
//! - `medops_auth_rejections_total` - Authentication rejections (labels: reason)
//! - `medops_rate_limit_rejections_total` - Rejected requests (labels: limiter)
//! - `medops_rate_limit_fail_open_total` - Limiter errors treated as "admit" (labels: limiter)
//!
//! ## Histograms
//! - `medops_request_duration_seconds` - Pipeline request duration
//!   (labels: endpoint, method, status)
//!
//! ## Gauges
//! - `medops_rate_limit_tracked_keys` - Live rate limit entries after a sweep (labels: limiter)
//!
//! # Usage
//!
//! ```rust,ignore
//! use medops_gateway::metrics::{init_metrics, record_security_event};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_security_event("SUSPICIOUS_HEADER");
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const SECURITY_EVENTS_TOTAL: &str = "medops_security_events_total";
    pub const AUTH_REJECTIONS_TOTAL: &str = "medops_auth_rejections_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "medops_rate_limit_rejections_total";
    pub const RATE_LIMIT_FAIL_OPEN_TOTAL: &str = "medops_rate_limit_fail_open_total";
    pub const REQUEST_DURATION_SECONDS: &str = "medops_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_KEYS: &str = "medops_rate_limit_tracked_keys";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder, starts the HTTP listener on `metrics_addr`
/// and registers metric descriptions. Fails if a recorder is already
/// installed or the listener cannot be set up.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::SECURITY_EVENTS_TOTAL,
        "Total number of security events detected by the request pipeline"
    );
    describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Total number of requests rejected during authentication"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by a rate limiter"
    );
    describe_counter!(
        names::RATE_LIMIT_FAIL_OPEN_TOTAL,
        "Total number of rate limit checks that failed and admitted the request"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Pipeline request duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_TRACKED_KEYS,
        "Rate limit entries remaining after the last sweep"
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

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a detected security event.
pub fn record_security_event(event: &'static str) {
    counter!(names::SECURITY_EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record an authentication rejection (`missing_token`, `invalid_token`, ...).
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a request rejected by the named limiter.
pub fn record_rate_limit_rejection(limiter: &str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "limiter" => limiter.to_string()).increment(1);
}

/// Record a limiter failure that admitted the request.
pub fn record_rate_limit_fail_open(limiter: &str) {
    counter!(names::RATE_LIMIT_FAIL_OPEN_TOTAL, "limiter" => limiter.to_string()).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record pipeline request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: u16, duration_secs: f64) {
    histogram!(
        names::REQUEST_DURATION_SECONDS,
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the tracked-keys gauge for a limiter.
pub fn set_rate_limit_tracked_keys(limiter: &str, keys: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_KEYS, "limiter" => limiter.to_string()).set(keys as f64);
}
