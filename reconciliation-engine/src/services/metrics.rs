//! Prometheus metrics for reconciliation-engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tracing::warn;

/// Counter for workspace operations by outcome.
pub static RECONCILIATION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_operations_total",
        "Total number of reconciliation operations",
        &["operation", "status"]
    )
    .expect("Failed to register RECONCILIATION_OPERATIONS")
});

/// Histogram for store call duration by operation.
pub static STORE_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_store_call_duration_seconds",
        "Store call duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register STORE_CALL_DURATION")
});

/// Counter for transactions moved between reconciliation states.
pub static TRANSACTIONS_TRANSITIONED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_transactions_transitioned_total",
        "Total number of transactions moved between reconciliation states",
        &["operation"]
    )
    .expect("Failed to register TRANSACTIONS_TRANSITIONED")
});

/// Counter for async results discarded because a newer load started.
pub static STALE_RESULTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_stale_results_total",
        "Total number of stale async results discarded",
        &["operation"]
    )
    .expect("Failed to register STALE_RESULTS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&RECONCILIATION_OPERATIONS);
    Lazy::force(&STORE_CALL_DURATION);
    Lazy::force(&TRANSACTIONS_TRANSITIONED);
    Lazy::force(&STALE_RESULTS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a reconciliation operation.
pub fn record_reconciliation_operation(operation: &str, status: &str) {
    RECONCILIATION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_transactions_transitioned(operation: &str, count: usize) {
    TRANSACTIONS_TRANSITIONED
        .with_label_values(&[operation])
        .inc_by(count as f64);
}

pub fn record_stale_result(operation: &str) {
    STALE_RESULTS.with_label_values(&[operation]).inc();
}
