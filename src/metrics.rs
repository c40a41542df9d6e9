//! Prometheus metrics for the routing layer.
//!
//! Metrics are exposed via a dedicated HTTP listener (default `0.0.0.0:9090`).
//! Every recording function is safe to call before `init_metrics`; without an
//! installed recorder the calls are no-ops.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `tenant_routing_decisions_total` - Routing outcomes (label: outcome)
//! - `custom_domain_lookups_total` - Custom-domain resolutions (label: source)
//! - `backend_errors_total` - Backend failures (labels: backend, operation)
//! - `rate_limit_rejections_total` - Requests rejected with 429
//! - `session_cookies_propagated_total` - Cookies copied onto responses (label: result)
//!
//! ## Histograms
//! - `custom_domain_resolve_duration_seconds` - Time spent resolving a custom domain
//!
//! ## Gauges
//! - `memory_cache_entries` - Entries held by the in-process cache

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const ROUTING_DECISIONS_TOTAL: &str = "tenant_routing_decisions_total";
    pub const CUSTOM_DOMAIN_LOOKUPS_TOTAL: &str = "custom_domain_lookups_total";
    pub const BACKEND_ERRORS_TOTAL: &str = "backend_errors_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
    pub const SESSION_COOKIES_PROPAGATED_TOTAL: &str = "session_cookies_propagated_total";
    pub const CUSTOM_DOMAIN_RESOLVE_DURATION_SECONDS: &str =
        "custom_domain_resolve_duration_seconds";
    pub const MEMORY_CACHE_ENTRIES: &str = "memory_cache_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns an error message if the exporter cannot be installed (for example
/// when the listener address is taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::ROUTING_DECISIONS_TOTAL,
        "Tenant routing decisions by outcome"
    );
    describe_counter!(
        names::CUSTOM_DOMAIN_LOOKUPS_TOTAL,
        "Custom-domain resolutions by source (cache, store, miss, error)"
    );
    describe_counter!(
        names::BACKEND_ERRORS_TOTAL,
        "Errors returned by cache, store, limiter and session backends"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "API requests rejected by the rate limiter"
    );
    describe_counter!(
        names::SESSION_COOKIES_PROPAGATED_TOTAL,
        "Session cookies copied onto responses by result"
    );

    describe_histogram!(
        names::CUSTOM_DOMAIN_RESOLVE_DURATION_SECONDS,
        "Custom-domain resolution duration in seconds"
    );

    describe_gauge!(
        names::MEMORY_CACHE_ENTRIES,
        "Entries held by the in-process key-value cache"
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

/// Record a routing decision (`rewrite`, `root_domain`, `api_namespace`, ...).
pub fn record_routing_decision(outcome: &'static str) {
    counter!(names::ROUTING_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record where a custom-domain lookup was answered from.
pub fn record_custom_domain_lookup(source: &'static str) {
    counter!(names::CUSTOM_DOMAIN_LOOKUPS_TOTAL, "source" => source).increment(1);
}

/// Record a backend failure.
pub fn record_backend_error(backend: &'static str, operation: &'static str) {
    counter!(names::BACKEND_ERRORS_TOTAL, "backend" => backend, "operation" => operation)
        .increment(1);
}

/// Record a 429 rejection.
pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

/// Record cookies copied (and failed to copy) onto a response.
pub fn record_cookies_propagated(copied: u64, failed: u64) {
    if copied > 0 {
        counter!(names::SESSION_COOKIES_PROPAGATED_TOTAL, "result" => "copied").increment(copied);
    }
    if failed > 0 {
        counter!(names::SESSION_COOKIES_PROPAGATED_TOTAL, "result" => "failed").increment(failed);
    }
}

// =============================================================================
// Histogram / Gauge Recording Functions
// =============================================================================

/// Record how long a custom-domain resolution took.
pub fn record_resolve_duration(duration_secs: f64) {
    histogram!(names::CUSTOM_DOMAIN_RESOLVE_DURATION_SECONDS).record(duration_secs);
}

/// Update the in-process cache size gauge.
pub fn set_memory_cache_entries(entries: usize) {
    gauge!(names::MEMORY_CACHE_ENTRIES).set(entries as f64);
}
