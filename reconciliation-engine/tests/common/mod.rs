#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use reconciliation_engine::config::ReconciliationConfig;
use reconciliation_engine::models::{
    BankAccount, DraftReconciliation, FinalizedReconciliation, HistoryPage, TransactionRecord,
    TransactionSplit,
};
use reconciliation_engine::services::{InMemoryStore, LedgerBalanceSource, ReconciliationStore};
use reconciliation_engine::{ReconciliationWorkspace, WorkspaceHandle, WorkspaceView};
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const TEST_USER_ID: &str = "test_user_123";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn statement_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
}

pub fn dec(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn test_config() -> ReconciliationConfig {
    ReconciliationConfig {
        store_retry: RetryConfig::quick(),
        history_page_size: 10,
        ..Default::default()
    }
}

/// One bank account with a deposit (100.00) and a fee (-5.00) on the
/// statement, one receipt (95.00) in the books and a ledger balance of
/// 1000.00.
pub struct Seeded {
    pub store: Arc<InMemoryStore>,
    pub bank_account_id: Uuid,
    pub ledger_account_id: Uuid,
    pub deposit: Uuid,
    pub fee: Uuid,
    pub receipt: Uuid,
}

pub async fn seed_store() -> Seeded {
    let store = Arc::new(InMemoryStore::new());
    let (bank_account_id, ledger_account_id) = add_account(&store, dec(100000)).await;

    let deposit = store
        .add_transaction(
            bank_account_id,
            TransactionRecord::statement(statement_date(), "Customer deposit", dec(10000))
                .with_reference("DEP-001"),
        )
        .await;
    let fee = store
        .add_transaction(
            bank_account_id,
            TransactionRecord::statement(statement_date(), "Wire fee", dec(-500)),
        )
        .await;
    let receipt = store
        .add_transaction(
            bank_account_id,
            TransactionRecord::system(statement_date(), "Invoice 1042 receipt", dec(9500)),
        )
        .await;

    Seeded {
        store,
        bank_account_id,
        ledger_account_id,
        deposit,
        fee,
        receipt,
    }
}

/// Returns (bank account id, ledger account id).
pub async fn add_account(store: &InMemoryStore, ledger_balance: Decimal) -> (Uuid, Uuid) {
    let ledger_account_id = Uuid::new_v4();
    let bank_account_id = store
        .add_bank_account(BankAccount::new(ledger_account_id, "Test Bank", "USD"))
        .await;
    store
        .set_ledger_balance(ledger_account_id, ledger_balance)
        .await;
    (bank_account_id, ledger_account_id)
}

pub fn spawn_workspace(store: Arc<InMemoryStore>) -> WorkspaceHandle {
    init_tracing();
    ReconciliationWorkspace::spawn(store.clone(), store, test_config(), TEST_USER_ID)
}

pub fn spawn_controlled(controlled: Arc<ControlledStore>) -> WorkspaceHandle {
    init_tracing();
    let ledger = controlled.inner.clone();
    ReconciliationWorkspace::spawn(controlled, ledger, test_config(), TEST_USER_ID)
}

/// Wait until the published view satisfies `predicate`.
pub async fn wait_for_view(
    handle: &WorkspaceHandle,
    predicate: impl FnMut(&WorkspaceView) -> bool,
) -> WorkspaceView {
    let mut rx = handle.subscribe();
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for workspace view")
        .expect("Workspace closed")
        .clone();
    view
}

/// Store wrapper that can hold pool fetches for chosen accounts, hold
/// finalize calls and inject transient failures.
pub struct ControlledStore {
    pub inner: Arc<InMemoryStore>,
    held: Mutex<HashSet<Uuid>>,
    finalize_held: AtomicBool,
    gate: Notify,
    transient_failures: AtomicU32,
}

impl ControlledStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            held: Mutex::new(HashSet::new()),
            finalize_held: AtomicBool::new(false),
            gate: Notify::new(),
            transient_failures: AtomicU32::new(0),
        }
    }

    /// Block unreconciled-pool fetches for `bank_account_id` until released.
    pub fn hold(&self, bank_account_id: Uuid) {
        self.held.lock().unwrap().insert(bank_account_id);
    }

    pub fn release(&self, bank_account_id: Uuid) {
        self.held.lock().unwrap().remove(&bank_account_id);
        self.gate.notify_waiters();
    }

    /// Block finalize calls until released.
    pub fn hold_finalize(&self) {
        self.finalize_held.store(true, Ordering::SeqCst);
    }

    pub fn release_finalize(&self) {
        self.finalize_held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    /// Fail the next `count` unreconciled-pool fetches with `ServiceUnavailable`.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    async fn wait_if_held(&self, bank_account_id: Uuid) {
        loop {
            let notified = self.gate.notified();
            if !self.held.lock().unwrap().contains(&bank_account_id) {
                return;
            }
            notified.await;
        }
    }

    async fn wait_if_finalize_held(&self) {
        loop {
            let notified = self.gate.notified();
            if !self.finalize_held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ReconciliationStore for ControlledStore {
    async fn get_bank_account(
        &self,
        bank_account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        self.inner.get_bank_account(bank_account_id).await
    }

    async fn get_or_create_draft(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
        user_id: &str,
    ) -> Result<DraftReconciliation, AppError> {
        self.inner
            .get_or_create_draft(bank_account_id, statement_date, statement_ending_balance, user_id)
            .await
    }

    async fn get_unreconciled_transactions(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
    ) -> Result<TransactionSplit, AppError> {
        self.wait_if_held(bank_account_id).await;
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ServiceUnavailable);
        }
        self.inner
            .get_unreconciled_transactions(bank_account_id, statement_date)
            .await
    }

    async fn get_transactions_for_reconciliation(
        &self,
        reconciliation_id: Uuid,
    ) -> Result<TransactionSplit, AppError> {
        self.inner
            .get_transactions_for_reconciliation(reconciliation_id)
            .await
    }

    async fn mark_provisionally_reconciled(
        &self,
        reconciliation_id: Uuid,
        transaction_ids: &[Uuid],
        statement_date: NaiveDate,
        user_id: &str,
    ) -> Result<bool, AppError> {
        self.inner
            .mark_provisionally_reconciled(reconciliation_id, transaction_ids, statement_date, user_id)
            .await
    }

    async fn unreconcile_transactions(
        &self,
        transaction_ids: &[Uuid],
        user_id: &str,
    ) -> Result<bool, AppError> {
        self.inner
            .unreconcile_transactions(transaction_ids, user_id)
            .await
    }

    async fn finalize_reconciliation(
        &self,
        reconciliation_id: Uuid,
        statement_ending_balance: Decimal,
        adjusted_book_balance: Decimal,
        difference: Decimal,
        user_id: &str,
    ) -> Result<FinalizedReconciliation, AppError> {
        self.wait_if_finalize_held().await;
        self.inner
            .finalize_reconciliation(
                reconciliation_id,
                statement_ending_balance,
                adjusted_book_balance,
                difference,
                user_id,
            )
            .await
    }

    async fn list_reconciliations(
        &self,
        bank_account_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, AppError> {
        self.inner
            .list_reconciliations(bank_account_id, page, page_size)
            .await
    }
}

#[async_trait]
impl LedgerBalanceSource for ControlledStore {
    async fn get_account_balance(
        &self,
        ledger_account_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Decimal, AppError> {
        self.inner.get_account_balance(ledger_account_id, as_of).await
    }
}
