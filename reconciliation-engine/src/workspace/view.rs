use crate::engine::{BalanceSnapshot, PoolKind, PoolRow, ReconciliationSession, SelectionTotals};
use crate::error::{Operation, ReconciliationError};
use crate::models::FinalizedReconciliation;
use chrono::NaiveDate;
use uuid::Uuid;

/// Everything a UI needs to render the workspace, published after every
/// applied change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceView {
    pub bank_account_id: Option<Uuid>,
    pub statement_date: Option<NaiveDate>,
    pub reconciliation_id: Option<Uuid>,
    pub unreconciled_statement: Vec<PoolRow>,
    pub unreconciled_system: Vec<PoolRow>,
    pub matched_statement: Vec<PoolRow>,
    pub matched_system: Vec<PoolRow>,
    pub totals: SelectionTotals,
    pub balance: BalanceSnapshot,
    pub is_zero_difference: bool,
    pub in_flight: Option<Operation>,
    /// e.g. "Loading..." while an operation is in flight.
    pub status: Option<String>,
    pub last_error: Option<ReconciliationError>,
    pub last_finalized: Option<FinalizedReconciliation>,
    pub epoch: u64,
    pub stale_discarded: u64,
}

impl WorkspaceView {
    pub(crate) fn capture(
        session: &ReconciliationSession,
        in_flight: Option<Operation>,
        last_error: Option<ReconciliationError>,
        epoch: u64,
        stale_discarded: u64,
    ) -> Self {
        Self {
            bank_account_id: session.bank_account_id(),
            statement_date: session.statement_date(),
            reconciliation_id: session.reconciliation_id(),
            unreconciled_statement: session.pool(PoolKind::UnreconciledStatement).snapshot(),
            unreconciled_system: session.pool(PoolKind::UnreconciledSystem).snapshot(),
            matched_statement: session.pool(PoolKind::MatchedStatement).snapshot(),
            matched_system: session.pool(PoolKind::MatchedSystem).snapshot(),
            totals: session.totals().clone(),
            balance: session.balance().clone(),
            is_zero_difference: session.is_zero_difference(),
            in_flight,
            status: in_flight.map(|op| status_label(op).to_string()),
            last_error,
            last_finalized: session.last_finalized().cloned(),
            epoch,
            stale_discarded,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn rows(&self, kind: PoolKind) -> &[PoolRow] {
        match kind {
            PoolKind::UnreconciledStatement => &self.unreconciled_statement,
            PoolKind::UnreconciledSystem => &self.unreconciled_system,
            PoolKind::MatchedStatement => &self.matched_statement,
            PoolKind::MatchedSystem => &self.matched_system,
        }
    }

    /// Row index of `id` within the given pool.
    pub fn position(&self, kind: PoolKind, id: Uuid) -> Option<usize> {
        self.rows(kind).iter().position(|row| row.record.id == id)
    }
}

fn status_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Load => "Loading...",
        Operation::Match => "Matching...",
        Operation::Unmatch => "Unmatching...",
        Operation::Finalize => "Finalizing...",
        Operation::Refresh => "Refreshing...",
        Operation::History => "Loading history...",
    }
}

/// Result of a persisted match or unmatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub operation: Operation,
    pub transaction_count: usize,
    /// False when the follow-up re-fetch failed or was superseded by a newer
    /// load; the change itself was persisted either way.
    pub refreshed: bool,
}
