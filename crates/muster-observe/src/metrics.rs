//! Metrics collection for Muster operations
//!
//! Structured metrics using the `metrics` crate with Prometheus export.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize all metric descriptions
pub fn init_metrics_descriptions() {
    // Check metrics
    describe_counter!(
        "muster_checks_total",
        "Total number of access checks performed, labeled by decision"
    );
    describe_histogram!(
        "muster_check_duration_seconds",
        "Duration of access checks in seconds"
    );

    // Expand metrics
    describe_counter!("muster_expands_total", "Total number of relation expansions performed");

    // Ingestion metrics
    describe_counter!("muster_reports_total", "Total number of resource reports ingested");
    describe_counter!("muster_deletes_total", "Total number of resource deletes ingested");

    // Cache metrics
    describe_gauge!("muster_cache_entries", "Current number of entries in the check cache");
    describe_gauge!("muster_cache_hit_rate", "Check cache hit rate as a percentage");

    // API metrics
    describe_counter!(
        "muster_api_requests_total",
        "Total number of API requests by endpoint, method, and status"
    );
    describe_counter!(
        "muster_api_errors_total",
        "Total number of API errors by endpoint and status code"
    );
    describe_histogram!(
        "muster_api_request_duration_seconds",
        "Duration of API requests in seconds"
    );
}

/// Record an API request
pub fn record_api_request(endpoint: &str, method: &str, status_code: u16, duration_seconds: f64) {
    counter!(
        "muster_api_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    if status_code >= 400 {
        counter!(
            "muster_api_errors_total",
            "endpoint" => endpoint.to_string(),
            "status" => status_code.to_string()
        )
        .increment(1);
    }

    histogram!(
        "muster_api_request_duration_seconds",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string()
    )
    .record(duration_seconds);
}

/// Update check cache statistics
pub fn update_cache_stats(entries: u64, hit_rate: f64) {
    gauge!("muster_cache_entries").set(entries as f64);
    gauge!("muster_cache_hit_rate").set(hit_rate);
}
