//! Reconciliation Engine - bank statement matching, balance reconciliation and
//! draft session lifecycle.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
pub mod workspace;

pub use error::{Operation, ReconciliationError};
pub use workspace::{MatchOutcome, ReconciliationWorkspace, WorkspaceHandle, WorkspaceView};
