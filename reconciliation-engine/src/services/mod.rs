//! Services module for reconciliation-engine.

pub mod memory;
pub mod metrics;
pub mod store;

pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_reconciliation_operation,
    record_stale_result, record_transactions_transitioned,
};
pub use store::{LedgerBalanceSource, ReconciliationStore};
