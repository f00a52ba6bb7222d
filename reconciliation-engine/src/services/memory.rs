//! In-memory implementation of the store and ledger boundary.

use crate::models::{
    BankAccount, DraftReconciliation, DraftStatus, FinalizedReconciliation, HistoryPage,
    ReconciliationState, ReconciliationSummary, TransactionRecord, TransactionSplit,
};
use crate::services::metrics::STORE_CALL_DURATION;
use crate::services::store::{LedgerBalanceSource, ReconciliationStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
struct StoredTransaction {
    bank_account_id: Uuid,
    reconciliation_id: Option<Uuid>,
    record: TransactionRecord,
}

#[derive(Debug, Clone)]
struct StoredReconciliation {
    draft: DraftReconciliation,
    adjusted_book_balance: Option<Decimal>,
    difference: Option<Decimal>,
    matched_count: usize,
    completed_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, BankAccount>,
    transactions: Vec<StoredTransaction>,
    reconciliations: Vec<StoredReconciliation>,
    ledger_balances: HashMap<Uuid, Decimal>,
}

impl State {
    fn transaction_mut(&mut self, id: Uuid) -> Option<&mut StoredTransaction> {
        self.transactions.iter_mut().find(|t| t.record.id == id)
    }

    fn transaction(&self, id: Uuid) -> Option<&StoredTransaction> {
        self.transactions.iter().find(|t| t.record.id == id)
    }

    fn reconciliation_mut(&mut self, id: Uuid) -> Option<&mut StoredReconciliation> {
        self.reconciliations
            .iter_mut()
            .find(|r| r.draft.reconciliation_id == id)
    }
}

/// Store backed by process memory.
///
/// Every mutation validates all of its inputs before changing anything, so a
/// rejected call leaves no partial state behind.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    failures: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_bank_account(&self, account: BankAccount) -> Uuid {
        let id = account.bank_account_id;
        self.state.write().await.accounts.insert(id, account);
        id
    }

    pub async fn add_transaction(&self, bank_account_id: Uuid, record: TransactionRecord) -> Uuid {
        let id = record.id;
        self.state.write().await.transactions.push(StoredTransaction {
            bank_account_id,
            reconciliation_id: None,
            record,
        });
        id
    }

    pub async fn set_ledger_balance(&self, ledger_account_id: Uuid, balance: Decimal) {
        self.state
            .write()
            .await
            .ledger_balances
            .insert(ledger_account_id, balance);
    }

    /// Make the next call of `operation` fail with `AppError::Rejected(details)`.
    pub async fn fail_next(&self, operation: &str, details: Vec<String>) {
        self.failures
            .lock()
            .await
            .insert(operation.to_string(), details);
    }

    pub async fn transaction(&self, id: Uuid) -> Option<TransactionRecord> {
        self.state
            .read()
            .await
            .transaction(id)
            .map(|t| t.record.clone())
    }

    pub async fn bank_account(&self, id: Uuid) -> Option<BankAccount> {
        self.state.read().await.accounts.get(&id).cloned()
    }

    async fn injected_failure(&self, operation: &str) -> Result<(), AppError> {
        match self.failures.lock().await.remove(operation) {
            Some(details) => {
                warn!(operation = operation, "Injected store failure");
                Err(AppError::Rejected(details))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    #[instrument(skip(self), fields(bank_account_id = %bank_account_id))]
    async fn get_bank_account(
        &self,
        bank_account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["get_bank_account"])
            .start_timer();
        self.injected_failure("get_bank_account").await?;

        let account = self.state.read().await.accounts.get(&bank_account_id).cloned();

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self), fields(bank_account_id = %bank_account_id))]
    async fn get_or_create_draft(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
        user_id: &str,
    ) -> Result<DraftReconciliation, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["get_or_create_draft"])
            .start_timer();
        self.injected_failure("get_or_create_draft").await?;

        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&bank_account_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Bank account {} not found",
                bank_account_id
            )));
        }

        let existing = state.reconciliations.iter().find(|r| {
            r.draft.status == DraftStatus::InProgress
                && r.draft.bank_account_id == bank_account_id
                && r.draft.statement_date == statement_date
                && r.draft.statement_ending_balance == statement_ending_balance
        });
        if let Some(existing) = existing {
            timer.observe_duration();
            return Ok(existing.draft.clone());
        }

        let draft = DraftReconciliation {
            reconciliation_id: Uuid::new_v4(),
            bank_account_id,
            statement_date,
            statement_ending_balance,
            status: DraftStatus::InProgress,
            created_by: user_id.to_string(),
            started_utc: Utc::now(),
        };
        state.reconciliations.push(StoredReconciliation {
            draft: draft.clone(),
            adjusted_book_balance: None,
            difference: None,
            matched_count: 0,
            completed_utc: None,
        });

        timer.observe_duration();
        info!(reconciliation_id = %draft.reconciliation_id, "Draft reconciliation created");

        Ok(draft)
    }

    #[instrument(skip(self), fields(bank_account_id = %bank_account_id))]
    async fn get_unreconciled_transactions(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
    ) -> Result<TransactionSplit, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["get_unreconciled_transactions"])
            .start_timer();
        self.injected_failure("get_unreconciled_transactions").await?;

        let state = self.state.read().await;
        let split = TransactionSplit::from_records(
            state
                .transactions
                .iter()
                .filter(|t| {
                    t.bank_account_id == bank_account_id
                        && t.record.state == ReconciliationState::Unreconciled
                        && t.record.transaction_date <= statement_date
                })
                .map(|t| t.record.clone()),
        );

        timer.observe_duration();
        Ok(split)
    }

    #[instrument(skip(self), fields(reconciliation_id = %reconciliation_id))]
    async fn get_transactions_for_reconciliation(
        &self,
        reconciliation_id: Uuid,
    ) -> Result<TransactionSplit, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["get_transactions_for_reconciliation"])
            .start_timer();
        self.injected_failure("get_transactions_for_reconciliation")
            .await?;

        let state = self.state.read().await;
        let split = TransactionSplit::from_records(
            state
                .transactions
                .iter()
                .filter(|t| {
                    t.reconciliation_id == Some(reconciliation_id)
                        && t.record.state == ReconciliationState::ProvisionallyMatched
                })
                .map(|t| t.record.clone()),
        );

        timer.observe_duration();
        Ok(split)
    }

    #[instrument(skip(self, transaction_ids), fields(reconciliation_id = %reconciliation_id, count = transaction_ids.len()))]
    async fn mark_provisionally_reconciled(
        &self,
        reconciliation_id: Uuid,
        transaction_ids: &[Uuid],
        statement_date: NaiveDate,
        user_id: &str,
    ) -> Result<bool, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["mark_provisionally_reconciled"])
            .start_timer();
        self.injected_failure("mark_provisionally_reconciled")
            .await?;

        let mut state = self.state.write().await;
        let bank_account_id = match state.reconciliation_mut(reconciliation_id) {
            Some(r) if r.draft.status == DraftStatus::InProgress => r.draft.bank_account_id,
            Some(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Reconciliation {} is not in progress",
                    reconciliation_id
                )))
            }
            None => {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Reconciliation {} not found",
                    reconciliation_id
                )))
            }
        };

        let problems: Vec<String> = transaction_ids
            .iter()
            .filter_map(|id| match state.transaction(*id) {
                None => Some(format!("Transaction {} not found", id)),
                Some(t) if t.bank_account_id != bank_account_id => {
                    Some(format!("Transaction {} belongs to another bank account", id))
                }
                Some(t) if t.record.state != ReconciliationState::Unreconciled => {
                    Some(format!("Transaction {} is already {}", id, t.record.state))
                }
                Some(t) if t.record.transaction_date > statement_date => Some(format!(
                    "Transaction {} is dated after the statement date",
                    id
                )),
                Some(_) => None,
            })
            .collect();
        if !problems.is_empty() {
            return Err(AppError::Rejected(problems));
        }

        for id in transaction_ids {
            if let Some(t) = state.transaction_mut(*id) {
                t.record.state = ReconciliationState::ProvisionallyMatched;
                t.reconciliation_id = Some(reconciliation_id);
            }
        }

        timer.observe_duration();
        info!(
            user_id = user_id,
            count = transaction_ids.len(),
            "Transactions provisionally reconciled"
        );

        Ok(true)
    }

    #[instrument(skip(self, transaction_ids), fields(count = transaction_ids.len()))]
    async fn unreconcile_transactions(
        &self,
        transaction_ids: &[Uuid],
        user_id: &str,
    ) -> Result<bool, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["unreconcile_transactions"])
            .start_timer();
        self.injected_failure("unreconcile_transactions").await?;

        let mut state = self.state.write().await;
        let problems: Vec<String> = transaction_ids
            .iter()
            .filter_map(|id| match state.transaction(*id) {
                None => Some(format!("Transaction {} not found", id)),
                Some(t) if t.record.state != ReconciliationState::ProvisionallyMatched => Some(
                    format!("Transaction {} is {}, not provisionally matched", id, t.record.state),
                ),
                Some(_) => None,
            })
            .collect();
        if !problems.is_empty() {
            return Err(AppError::Rejected(problems));
        }

        for id in transaction_ids {
            if let Some(t) = state.transaction_mut(*id) {
                t.record.state = ReconciliationState::Unreconciled;
                t.reconciliation_id = None;
            }
        }

        timer.observe_duration();
        info!(
            user_id = user_id,
            count = transaction_ids.len(),
            "Transactions unreconciled"
        );

        Ok(true)
    }

    #[instrument(skip(self), fields(reconciliation_id = %reconciliation_id))]
    async fn finalize_reconciliation(
        &self,
        reconciliation_id: Uuid,
        statement_ending_balance: Decimal,
        adjusted_book_balance: Decimal,
        difference: Decimal,
        user_id: &str,
    ) -> Result<FinalizedReconciliation, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["finalize_reconciliation"])
            .start_timer();
        self.injected_failure("finalize_reconciliation").await?;

        let mut state = self.state.write().await;
        let (bank_account_id, statement_date) = match state.reconciliation_mut(reconciliation_id) {
            Some(r) if r.draft.status == DraftStatus::InProgress => {
                (r.draft.bank_account_id, r.draft.statement_date)
            }
            Some(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Reconciliation {} is not in progress",
                    reconciliation_id
                )))
            }
            None => {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Reconciliation {} not found",
                    reconciliation_id
                )))
            }
        };

        let mut matched_count = 0;
        for t in state
            .transactions
            .iter_mut()
            .filter(|t| t.reconciliation_id == Some(reconciliation_id))
        {
            if t.record.state == ReconciliationState::ProvisionallyMatched {
                t.record.state = ReconciliationState::Finalized;
                matched_count += 1;
            }
        }

        let completed_utc = Utc::now();
        if let Some(r) = state.reconciliation_mut(reconciliation_id) {
            r.draft.status = DraftStatus::Finalized;
            r.draft.statement_ending_balance = statement_ending_balance;
            r.adjusted_book_balance = Some(adjusted_book_balance);
            r.difference = Some(difference);
            r.matched_count = matched_count;
            r.completed_utc = Some(completed_utc);
        }
        if let Some(account) = state.accounts.get_mut(&bank_account_id) {
            account.last_reconciled_date = Some(statement_date);
            account.last_reconciled_balance = Some(statement_ending_balance);
        }

        timer.observe_duration();
        info!(
            user_id = user_id,
            matched_count = matched_count,
            "Reconciliation finalized"
        );

        Ok(FinalizedReconciliation {
            reconciliation_id,
            bank_account_id,
            statement_date,
            statement_ending_balance,
            adjusted_book_balance,
            difference,
            matched_count,
            finalized_by: user_id.to_string(),
            completed_utc,
        })
    }

    #[instrument(skip(self), fields(bank_account_id = %bank_account_id))]
    async fn list_reconciliations(
        &self,
        bank_account_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["list_reconciliations"])
            .start_timer();
        self.injected_failure("list_reconciliations").await?;

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let state = self.state.read().await;
        let mut matching: Vec<&StoredReconciliation> = state
            .reconciliations
            .iter()
            .filter(|r| r.draft.bank_account_id == bank_account_id)
            .collect();
        matching.sort_by(|a, b| {
            b.draft
                .statement_date
                .cmp(&a.draft.statement_date)
                .then(b.draft.started_utc.cmp(&a.draft.started_utc))
        });

        let total_count = matching.len() as u64;
        let offset = (u64::from(page) - 1).saturating_mul(u64::from(page_size));
        let records = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(page_size as usize)
            .map(|r| ReconciliationSummary {
                reconciliation_id: r.draft.reconciliation_id,
                bank_account_id: r.draft.bank_account_id,
                statement_date: r.draft.statement_date,
                statement_ending_balance: r.draft.statement_ending_balance,
                adjusted_book_balance: r.adjusted_book_balance,
                difference: r.difference,
                status: r.draft.status,
                matched_count: r.matched_count,
                started_utc: r.draft.started_utc,
                completed_utc: r.completed_utc,
            })
            .collect();

        timer.observe_duration();

        Ok(HistoryPage {
            records,
            total_count,
            page,
            page_size,
        })
    }
}

#[async_trait]
impl LedgerBalanceSource for InMemoryStore {
    #[instrument(skip(self), fields(ledger_account_id = %ledger_account_id))]
    async fn get_account_balance(
        &self,
        ledger_account_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Decimal, AppError> {
        let timer = STORE_CALL_DURATION
            .with_label_values(&["get_account_balance"])
            .start_timer();
        self.injected_failure("get_account_balance").await?;

        let balance = self
            .state
            .read()
            .await
            .ledger_balances
            .get(&ledger_account_id)
            .copied()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No ledger balance for account {}",
                    ledger_account_id
                ))
            })?;

        timer.observe_duration();
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    async fn seeded() -> (InMemoryStore, Uuid, Uuid, Uuid) {
        let store = InMemoryStore::new();
        let account = store
            .add_bank_account(BankAccount::new(Uuid::new_v4(), "First Bank", "USD"))
            .await;
        let deposit = store
            .add_transaction(
                account,
                TransactionRecord::statement(date(5), "Deposit", Decimal::new(10000, 2)),
            )
            .await;
        let receipt = store
            .add_transaction(
                account,
                TransactionRecord::system(date(4), "Receipt", Decimal::new(10000, 2)),
            )
            .await;
        store
            .add_transaction(
                account,
                TransactionRecord::system(date(20), "Later receipt", Decimal::new(500, 2)),
            )
            .await;
        (store, account, deposit, receipt)
    }

    #[tokio::test]
    async fn test_draft_is_idempotent_per_parameters() {
        let (store, account, _, _) = seeded().await;
        let balance = Decimal::new(100000, 2);

        let first = store
            .get_or_create_draft(account, date(10), balance, "alice")
            .await
            .unwrap();
        let again = store
            .get_or_create_draft(account, date(10), balance, "bob")
            .await
            .unwrap();
        let other = store
            .get_or_create_draft(account, date(11), balance, "alice")
            .await
            .unwrap();

        assert_eq!(first.reconciliation_id, again.reconciliation_id);
        assert_ne!(first.reconciliation_id, other.reconciliation_id);
    }

    #[tokio::test]
    async fn test_unreconciled_respects_statement_date() {
        let (store, account, _, _) = seeded().await;

        let split = store
            .get_unreconciled_transactions(account, date(10))
            .await
            .unwrap();

        assert_eq!(split.statement.len(), 1);
        assert_eq!(split.system.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_is_all_or_nothing() {
        let (store, account, deposit, receipt) = seeded().await;
        let draft = store
            .get_or_create_draft(account, date(10), Decimal::ZERO, "alice")
            .await
            .unwrap();

        let missing = Uuid::new_v4();
        let err = store
            .mark_provisionally_reconciled(
                draft.reconciliation_id,
                &[deposit, receipt, missing],
                date(10),
                "alice",
            )
            .await
            .unwrap_err();

        assert_eq!(err.details(), vec![format!("Transaction {} not found", missing)]);
        assert_eq!(
            store.transaction(deposit).await.unwrap().state,
            ReconciliationState::Unreconciled
        );
    }

    #[tokio::test]
    async fn test_finalize_updates_records_and_account() {
        let (store, account, deposit, receipt) = seeded().await;
        let draft = store
            .get_or_create_draft(account, date(10), Decimal::new(100000, 2), "alice")
            .await
            .unwrap();
        store
            .mark_provisionally_reconciled(
                draft.reconciliation_id,
                &[deposit, receipt],
                date(10),
                "alice",
            )
            .await
            .unwrap();

        let record = store
            .finalize_reconciliation(
                draft.reconciliation_id,
                Decimal::new(100000, 2),
                Decimal::new(100000, 2),
                Decimal::ZERO,
                "alice",
            )
            .await
            .unwrap();

        assert_eq!(record.matched_count, 2);
        assert_eq!(
            store.transaction(receipt).await.unwrap().state,
            ReconciliationState::Finalized
        );
        let account = store.bank_account(account).await.unwrap();
        assert_eq!(account.last_reconciled_date, Some(date(10)));

        let err = store
            .finalize_reconciliation(
                draft.reconciliation_id,
                Decimal::ZERO,
                Decimal::ZERO,
                Decimal::ZERO,
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let (store, account, _, _) = seeded().await;
        store
            .fail_next("get_bank_account", vec!["Service offline".to_string()])
            .await;

        let err = store.get_bank_account(account).await.unwrap_err();
        assert_eq!(err.details(), vec!["Service offline"]);
        assert!(store.get_bank_account(account).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paged() {
        let (store, account, _, _) = seeded().await;
        for day in [3, 17, 9] {
            store
                .get_or_create_draft(account, date(day), Decimal::ZERO, "alice")
                .await
                .unwrap();
        }

        let page = store.list_reconciliations(account, 1, 2).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.total_pages(), 2);
        let dates: Vec<_> = page.records.iter().map(|r| r.statement_date).collect();
        assert_eq!(dates, vec![date(17), date(9)]);

        let clamped = store.list_reconciliations(account, 0, 0).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.page_size, 1);
    }

    #[tokio::test]
    async fn test_history_page_past_the_end_is_empty() {
        let (store, account, _, _) = seeded().await;
        store
            .get_or_create_draft(account, date(31), Decimal::ZERO, "alice")
            .await
            .unwrap();

        let page = store
            .list_reconciliations(account, u32::MAX, 25)
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_count, 1);
        assert_eq!(page.page, u32::MAX);
    }
}
