//! The reconciliation session: one bank account, one statement date, one
//! draft at a time.
//!
//! The session owns the four pools and the derived totals. Operations that
//! need the service layer are split in two: `prepare_*` validates against the
//! current state and returns a request (or a named error, with nothing
//! changed), and the caller applies the persisted outcome afterwards by
//! re-fetching pools through [`ReconciliationSession::apply_pools`].

use crate::engine::balance::BalanceSnapshot;
use crate::engine::pool::TransactionPool;
use crate::engine::tolerance::Tolerance;
use crate::engine::totals::SelectionTotals;
use crate::error::ReconciliationError;
use crate::models::{
    BankAccount, DraftReconciliation, FinalizedReconciliation, TransactionSide, TransactionSplit,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    UnreconciledStatement,
    UnreconciledSystem,
    MatchedStatement,
    MatchedSystem,
}

/// Unreconciled and provisionally matched records as the store reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPools {
    pub unreconciled: TransactionSplit,
    pub matched: TransactionSplit,
}

/// Everything a load fetches.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub bank_account: BankAccount,
    pub draft: DraftReconciliation,
    pub pools: TransactionPools,
    /// `None` when the ledger could not be reached.
    pub book_balance: Option<Decimal>,
    pub tolerance: Tolerance,
}

/// What a re-fetch needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshScope {
    pub bank_account_id: Uuid,
    pub statement_date: NaiveDate,
    pub reconciliation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    pub scope: RefreshScope,
    pub statement_ids: Vec<Uuid>,
    pub system_ids: Vec<Uuid>,
    pub statement_total: Decimal,
    pub system_total: Decimal,
}

impl MatchRequest {
    pub fn transaction_ids(&self) -> Vec<Uuid> {
        self.statement_ids
            .iter()
            .chain(&self.system_ids)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchRequest {
    pub scope: RefreshScope,
    pub transaction_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalizeRequest {
    pub reconciliation_id: Uuid,
    pub statement_ending_balance: Decimal,
    pub adjusted_book_balance: Decimal,
    pub difference: Decimal,
}

#[derive(Debug, Clone)]
pub struct ReconciliationSession {
    bank_account_id: Option<Uuid>,
    bank_account: Option<BankAccount>,
    statement_date: Option<NaiveDate>,
    statement_ending_balance: Decimal,
    draft: Option<DraftReconciliation>,
    book_balance: Option<Decimal>,
    tolerance: Tolerance,
    statement_pool: TransactionPool,
    system_pool: TransactionPool,
    matched_statement_pool: TransactionPool,
    matched_system_pool: TransactionPool,
    totals: SelectionTotals,
    balance: BalanceSnapshot,
    last_finalized: Option<FinalizedReconciliation>,
}

impl Default for ReconciliationSession {
    fn default() -> Self {
        Self::new(Tolerance::default())
    }
}

impl ReconciliationSession {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            bank_account_id: None,
            bank_account: None,
            statement_date: None,
            statement_ending_balance: Decimal::ZERO,
            draft: None,
            book_balance: None,
            tolerance,
            statement_pool: TransactionPool::new(TransactionSide::Statement),
            system_pool: TransactionPool::new(TransactionSide::System),
            matched_statement_pool: TransactionPool::new(TransactionSide::Statement),
            matched_system_pool: TransactionPool::new(TransactionSide::System),
            totals: SelectionTotals::default(),
            balance: BalanceSnapshot::default(),
            last_finalized: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start over for new parameters. A draft that was active for other
    /// parameters is abandoned in memory only; it stays persisted.
    pub fn begin_load(
        &mut self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
    ) {
        if let Some(draft) = &self.draft {
            let same_parameters = draft.bank_account_id == bank_account_id
                && draft.statement_date == statement_date
                && draft.statement_ending_balance == statement_ending_balance;
            if !same_parameters {
                info!(
                    reconciliation_id = %draft.reconciliation_id,
                    bank_account_id = %draft.bank_account_id,
                    "Leaving draft reconciliation unfinalized"
                );
            }
        }

        let tolerance = self.tolerance;
        *self = Self::new(tolerance);
        self.bank_account_id = Some(bank_account_id);
        self.statement_date = Some(statement_date);
        self.statement_ending_balance = statement_ending_balance;
        self.recompute();
    }

    pub fn apply_load(&mut self, state: LoadedState) {
        info!(
            reconciliation_id = %state.draft.reconciliation_id,
            bank_account_id = %state.bank_account.bank_account_id,
            book_balance = ?state.book_balance,
            unreconciled = state.pools.unreconciled.len(),
            matched = state.pools.matched.len(),
            "Draft reconciliation loaded"
        );

        self.bank_account_id = Some(state.bank_account.bank_account_id);
        self.statement_date = Some(state.draft.statement_date);
        self.statement_ending_balance = state.draft.statement_ending_balance;
        self.bank_account = Some(state.bank_account);
        self.draft = Some(state.draft);
        self.book_balance = state.book_balance;
        self.tolerance = state.tolerance;
        self.apply_pools(state.pools);
    }

    /// Replace all four pools with what the store reported.
    pub fn apply_pools(&mut self, pools: TransactionPools) {
        self.statement_pool.replace_pool(pools.unreconciled.statement);
        self.system_pool.replace_pool(pools.unreconciled.system);
        self.matched_statement_pool.replace_pool(pools.matched.statement);
        self.matched_system_pool.replace_pool(pools.matched.system);
        self.recompute();
    }

    /// Record a successful finalize. The draft is gone; further work needs a
    /// new load.
    pub fn complete_finalize(&mut self, record: FinalizedReconciliation) {
        info!(
            reconciliation_id = %record.reconciliation_id,
            matched_count = record.matched_count,
            "Draft reconciliation finalized"
        );
        self.draft = None;
        self.matched_statement_pool.replace_pool(Vec::new());
        self.matched_system_pool.replace_pool(Vec::new());
        self.last_finalized = Some(record);
        self.recompute();
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Returns false when `row` is out of range.
    pub fn set_checked(&mut self, kind: PoolKind, row: usize, checked: bool) -> bool {
        let applied = self.pool_mut(kind).set_checked(row, checked);
        if applied {
            self.recompute();
        }
        applied
    }

    pub fn set_all_checked(&mut self, kind: PoolKind, checked: bool) {
        self.pool_mut(kind).set_all_checked(checked);
        self.recompute();
    }

    pub fn set_statement_ending_balance(&mut self, amount: Decimal) {
        self.statement_ending_balance = amount;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.totals =
            SelectionTotals::compute(&self.statement_pool, &self.system_pool, self.tolerance);
        self.balance = BalanceSnapshot::compute(
            &self.statement_pool,
            &self.system_pool,
            self.book_balance,
            self.statement_ending_balance,
        );
        debug!(
            selection = ?self.totals.state,
            difference = ?self.balance.difference,
            "Totals recomputed"
        );
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn refresh_scope(&self) -> Result<RefreshScope, ReconciliationError> {
        let draft = self.draft.as_ref().ok_or(ReconciliationError::NoActiveDraft)?;
        Ok(RefreshScope {
            bank_account_id: draft.bank_account_id,
            statement_date: draft.statement_date,
            reconciliation_id: draft.reconciliation_id,
        })
    }

    /// Validate a match of `ids`, or of the checked unreconciled rows when
    /// `ids` is `None`.
    ///
    /// Only the aggregate has to balance, so one-to-many and many-to-many
    /// groupings are accepted.
    pub fn prepare_match(&self, ids: Option<&[Uuid]>) -> Result<MatchRequest, ReconciliationError> {
        let scope = self.refresh_scope()?;

        let ids = match ids {
            Some(ids) => dedup(ids),
            None => {
                let mut checked = self.statement_pool.checked_ids();
                checked.extend(self.system_pool.checked_ids());
                checked
            }
        };

        let mut statement_ids = Vec::new();
        let mut system_ids = Vec::new();
        let mut unknown = Vec::new();
        let mut statement_total = Decimal::ZERO;
        let mut system_total = Decimal::ZERO;

        for id in ids {
            if let Some(record) = self.statement_pool.find(id) {
                statement_total += record.amount;
                statement_ids.push(id);
            } else if let Some(record) = self.system_pool.find(id) {
                system_total += record.amount;
                system_ids.push(id);
            } else {
                unknown.push(id);
            }
        }

        if !unknown.is_empty() {
            return Err(ReconciliationError::UnknownTransactions(unknown));
        }
        if statement_ids.is_empty() || system_ids.is_empty() {
            return Err(ReconciliationError::IncompleteSelection);
        }
        if !self.tolerance.amounts_equal(statement_total, system_total) {
            return Err(ReconciliationError::UnbalancedSelection {
                statement_total,
                system_total,
            });
        }

        Ok(MatchRequest {
            scope,
            statement_ids,
            system_ids,
            statement_total,
            system_total,
        })
    }

    /// Validate an unmatch of `ids`, or of the checked provisionally matched
    /// rows when `ids` is `None`. No balance check applies.
    pub fn prepare_unmatch(
        &self,
        ids: Option<&[Uuid]>,
    ) -> Result<UnmatchRequest, ReconciliationError> {
        let scope = self.refresh_scope()?;

        let transaction_ids = match ids {
            Some(ids) => dedup(ids),
            None => {
                let mut checked = self.matched_statement_pool.checked_ids();
                checked.extend(self.matched_system_pool.checked_ids());
                checked
            }
        };

        let all_matched = transaction_ids.iter().all(|id| {
            self.matched_statement_pool.find(*id).is_some()
                || self.matched_system_pool.find(*id).is_some()
        });
        if transaction_ids.is_empty() || !all_matched {
            return Err(ReconciliationError::EmptySelection);
        }

        Ok(UnmatchRequest {
            scope,
            transaction_ids,
        })
    }

    pub fn prepare_finalize(&self) -> Result<FinalizeRequest, ReconciliationError> {
        let draft = self.draft.as_ref().ok_or(ReconciliationError::NoActiveDraft)?;

        let (adjusted_book_balance, difference) = match (
            self.balance.adjusted_book_balance,
            self.balance.difference,
        ) {
            (Some(book), Some(difference)) => (book, difference),
            _ => return Err(ReconciliationError::IncompleteBalance),
        };

        if !self.tolerance.is_zero(difference) {
            return Err(ReconciliationError::Unbalanced { difference });
        }

        Ok(FinalizeRequest {
            reconciliation_id: draft.reconciliation_id,
            statement_ending_balance: self.statement_ending_balance,
            adjusted_book_balance,
            difference,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn pool(&self, kind: PoolKind) -> &TransactionPool {
        match kind {
            PoolKind::UnreconciledStatement => &self.statement_pool,
            PoolKind::UnreconciledSystem => &self.system_pool,
            PoolKind::MatchedStatement => &self.matched_statement_pool,
            PoolKind::MatchedSystem => &self.matched_system_pool,
        }
    }

    fn pool_mut(&mut self, kind: PoolKind) -> &mut TransactionPool {
        match kind {
            PoolKind::UnreconciledStatement => &mut self.statement_pool,
            PoolKind::UnreconciledSystem => &mut self.system_pool,
            PoolKind::MatchedStatement => &mut self.matched_statement_pool,
            PoolKind::MatchedSystem => &mut self.matched_system_pool,
        }
    }

    pub fn draft(&self) -> Option<&DraftReconciliation> {
        self.draft.as_ref()
    }

    pub fn reconciliation_id(&self) -> Option<Uuid> {
        self.draft.as_ref().map(|d| d.reconciliation_id)
    }

    pub fn bank_account_id(&self) -> Option<Uuid> {
        self.bank_account_id
    }

    pub fn bank_account(&self) -> Option<&BankAccount> {
        self.bank_account.as_ref()
    }

    pub fn statement_date(&self) -> Option<NaiveDate> {
        self.statement_date
    }

    pub fn statement_ending_balance(&self) -> Decimal {
        self.statement_ending_balance
    }

    pub fn book_balance(&self) -> Option<Decimal> {
        self.book_balance
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub fn totals(&self) -> &SelectionTotals {
        &self.totals
    }

    pub fn balance(&self) -> &BalanceSnapshot {
        &self.balance
    }

    pub fn is_zero_difference(&self) -> bool {
        self.balance.is_zero_difference(self.tolerance)
    }

    pub fn last_finalized(&self) -> Option<&FinalizedReconciliation> {
        self.last_finalized.as_ref()
    }
}

fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    unique
}
