//! Process-level setup for hosts embedding the workspace.

use crate::config::ReconciliationConfig;
use crate::services::init_metrics;
use service_core::observability::init_tracing;

/// Install tracing and register metrics. Safe to call more than once.
pub fn init_observability(config: &ReconciliationConfig) {
    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.json_logs,
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        history_page_size = config.history_page_size,
        store_max_retries = config.store_retry.max_retries,
        tolerance_minor_units = ?config.tolerance_minor_units,
        "Observability initialized"
    );
}
