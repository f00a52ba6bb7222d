//! Errors surfaced to the reconciliation UI.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Long-running operations the workspace dispatches to the service layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Load,
    Match,
    Unmatch,
    Finalize,
    Refresh,
    History,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Match => "match",
            Self::Unmatch => "unmatch",
            Self::Finalize => "finalize",
            Self::Refresh => "refresh",
            Self::History => "history",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconciliationError {
    #[error("No active draft reconciliation; load a bank account and statement first")]
    NoActiveDraft,

    #[error("Select at least one statement line and one system transaction to match")]
    IncompleteSelection,

    #[error("Select at least one provisionally matched transaction to unmatch")]
    EmptySelection,

    #[error(
        "Selected amounts do not balance: statement total {statement_total}, system total {system_total}"
    )]
    UnbalancedSelection {
        statement_total: Decimal,
        system_total: Decimal,
    },

    #[error("Reconciliation is out of balance by {difference}")]
    Unbalanced { difference: Decimal },

    #[error("Book balance is unavailable from the ledger; the difference cannot be computed")]
    IncompleteBalance,

    #[error("Selection contains transactions that are not unreconciled: {0:?}")]
    UnknownTransactions(Vec<Uuid>),

    #[error("Bank account {0} not found")]
    BankAccountNotFound(Uuid),

    #[error("Another operation is in progress: {0}")]
    Busy(Operation),

    #[error("Superseded by a newer load")]
    Superseded,

    #[error("{operation} failed: {}", .details.join("; "))]
    PersistenceFailure {
        operation: Operation,
        details: Vec<String>,
    },

    #[error("Reconciliation workspace has shut down")]
    WorkspaceClosed,
}

impl ReconciliationError {
    pub fn persistence(operation: Operation, err: AppError) -> Self {
        Self::PersistenceFailure {
            operation,
            details: err.details(),
        }
    }

    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoActiveDraft => "no_active_draft",
            Self::IncompleteSelection => "incomplete_selection",
            Self::EmptySelection => "empty_selection",
            Self::UnbalancedSelection { .. } => "unbalanced_selection",
            Self::Unbalanced { .. } => "unbalanced",
            Self::IncompleteBalance => "incomplete_balance",
            Self::UnknownTransactions(_) => "unknown_transactions",
            Self::BankAccountNotFound(_) => "bank_account_not_found",
            Self::Busy(_) => "busy",
            Self::Superseded => "superseded",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::WorkspaceClosed => "workspace_closed",
        }
    }
}
