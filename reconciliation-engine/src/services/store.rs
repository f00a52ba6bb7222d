//! The persistence and ledger boundary the engine is driven against.
//!
//! The store is the source of truth for every pool. Mutating calls report
//! success only; callers re-fetch afterwards instead of patching local state.

use crate::models::{
    BankAccount, DraftReconciliation, FinalizedReconciliation, HistoryPage, TransactionSplit,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn get_bank_account(&self, bank_account_id: Uuid)
        -> Result<Option<BankAccount>, AppError>;

    /// Returns the in-progress draft for these parameters, creating one if
    /// none exists.
    async fn get_or_create_draft(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
        user_id: &str,
    ) -> Result<DraftReconciliation, AppError>;

    async fn get_unreconciled_transactions(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
    ) -> Result<TransactionSplit, AppError>;

    /// Provisionally matched records held by a draft.
    async fn get_transactions_for_reconciliation(
        &self,
        reconciliation_id: Uuid,
    ) -> Result<TransactionSplit, AppError>;

    async fn mark_provisionally_reconciled(
        &self,
        reconciliation_id: Uuid,
        transaction_ids: &[Uuid],
        statement_date: NaiveDate,
        user_id: &str,
    ) -> Result<bool, AppError>;

    async fn unreconcile_transactions(
        &self,
        transaction_ids: &[Uuid],
        user_id: &str,
    ) -> Result<bool, AppError>;

    async fn finalize_reconciliation(
        &self,
        reconciliation_id: Uuid,
        statement_ending_balance: Decimal,
        adjusted_book_balance: Decimal,
        difference: Decimal,
        user_id: &str,
    ) -> Result<FinalizedReconciliation, AppError>;

    /// `page` is 1-based.
    async fn list_reconciliations(
        &self,
        bank_account_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, AppError>;
}

#[async_trait]
pub trait LedgerBalanceSource: Send + Sync {
    async fn get_account_balance(
        &self,
        ledger_account_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Decimal, AppError>;
}
