//! Matching engine: transaction pools, calculators and the session state machine.
//!
//! Everything here is synchronous and owned by a single caller. Derived values
//! are recomputed from the pools after every mutation, never patched.

pub mod balance;
pub mod pool;
pub mod session;
pub mod tolerance;
pub mod totals;

pub use balance::BalanceSnapshot;
pub use pool::{PoolRow, TransactionPool};
pub use session::{
    FinalizeRequest, LoadedState, MatchRequest, PoolKind, ReconciliationSession, RefreshScope,
    TransactionPools, UnmatchRequest,
};
pub use tolerance::Tolerance;
pub use totals::{SelectionState, SelectionTotals};
