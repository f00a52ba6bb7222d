//! Service-layer work run off the workspace task.
//!
//! Reads go through `retry_call`; mutations are attempted exactly once.

use crate::config::ReconciliationConfig;
use crate::engine::{
    FinalizeRequest, LoadedState, MatchRequest, RefreshScope, TransactionPools, UnmatchRequest,
};
use crate::error::{Operation, ReconciliationError};
use crate::models::{FinalizedReconciliation, HistoryPage};
use crate::services::{LedgerBalanceSource, ReconciliationStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::retry::retry_call;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub(crate) struct ServiceContext {
    pub store: Arc<dyn ReconciliationStore>,
    pub ledger: Arc<dyn LedgerBalanceSource>,
    pub config: ReconciliationConfig,
    pub user_id: String,
}

/// Outcome of a match or unmatch after the store has answered.
#[derive(Debug)]
pub(crate) enum MutationOutcome {
    Failed(ReconciliationError),
    Persisted {
        pools: Result<TransactionPools, ReconciliationError>,
    },
}

#[instrument(skip(ctx), fields(bank_account_id = %bank_account_id))]
pub(crate) async fn load(
    ctx: &ServiceContext,
    bank_account_id: Uuid,
    statement_date: NaiveDate,
    statement_ending_balance: Decimal,
) -> Result<LoadedState, ReconciliationError> {
    let retry = &ctx.config.store_retry;

    let bank_account = retry_call(retry, "get_bank_account", || {
        ctx.store.get_bank_account(bank_account_id)
    })
    .await
    .map_err(|e| ReconciliationError::persistence(Operation::Load, e))?
    .ok_or(ReconciliationError::BankAccountNotFound(bank_account_id))?;

    let draft = retry_call(retry, "get_or_create_draft", || {
        ctx.store.get_or_create_draft(
            bank_account_id,
            statement_date,
            statement_ending_balance,
            &ctx.user_id,
        )
    })
    .await
    .map_err(|e| ReconciliationError::persistence(Operation::Load, e))?;

    let scope = RefreshScope {
        bank_account_id,
        statement_date,
        reconciliation_id: draft.reconciliation_id,
    };
    let pools = fetch_pools(ctx, Operation::Load, scope).await?;

    let book_balance = match retry_call(retry, "get_account_balance", || {
        ctx.ledger
            .get_account_balance(bank_account.ledger_account_id, statement_date)
    })
    .await
    {
        Ok(balance) => Some(balance),
        Err(e) => {
            warn!(
                ledger_account_id = %bank_account.ledger_account_id,
                error = %e,
                "Book balance unavailable; balance data is incomplete"
            );
            None
        }
    };

    let tolerance = ctx.config.tolerance_for(&bank_account.currency);

    Ok(LoadedState {
        bank_account,
        draft,
        pools,
        book_balance,
        tolerance,
    })
}

pub(crate) async fn fetch_pools(
    ctx: &ServiceContext,
    operation: Operation,
    scope: RefreshScope,
) -> Result<TransactionPools, ReconciliationError> {
    let retry = &ctx.config.store_retry;

    let unreconciled = retry_call(retry, "get_unreconciled_transactions", || {
        ctx.store
            .get_unreconciled_transactions(scope.bank_account_id, scope.statement_date)
    })
    .await
    .map_err(|e| ReconciliationError::persistence(operation, e))?;

    let matched = retry_call(retry, "get_transactions_for_reconciliation", || {
        ctx.store
            .get_transactions_for_reconciliation(scope.reconciliation_id)
    })
    .await
    .map_err(|e| ReconciliationError::persistence(operation, e))?;

    Ok(TransactionPools {
        unreconciled,
        matched,
    })
}

#[instrument(skip(ctx, request), fields(reconciliation_id = %request.scope.reconciliation_id))]
pub(crate) async fn persist_match(ctx: &ServiceContext, request: MatchRequest) -> MutationOutcome {
    let ids = request.transaction_ids();
    let result = ctx
        .store
        .mark_provisionally_reconciled(
            request.scope.reconciliation_id,
            &ids,
            request.scope.statement_date,
            &ctx.user_id,
        )
        .await;

    after_mutation(ctx, Operation::Match, request.scope, result).await
}

#[instrument(skip(ctx, request), fields(reconciliation_id = %request.scope.reconciliation_id))]
pub(crate) async fn persist_unmatch(
    ctx: &ServiceContext,
    request: UnmatchRequest,
) -> MutationOutcome {
    let result = ctx
        .store
        .unreconcile_transactions(&request.transaction_ids, &ctx.user_id)
        .await;

    after_mutation(ctx, Operation::Unmatch, request.scope, result).await
}

async fn after_mutation(
    ctx: &ServiceContext,
    operation: Operation,
    scope: RefreshScope,
    result: Result<bool, service_core::error::AppError>,
) -> MutationOutcome {
    match result {
        Ok(true) => {
            info!(operation = %operation, "Mutation persisted; refreshing pools");
            MutationOutcome::Persisted {
                pools: fetch_pools(ctx, Operation::Refresh, scope).await,
            }
        }
        Ok(false) => MutationOutcome::Failed(ReconciliationError::PersistenceFailure {
            operation,
            details: vec![format!("The service did not complete the {}", operation)],
        }),
        Err(e) => MutationOutcome::Failed(ReconciliationError::persistence(operation, e)),
    }
}

#[instrument(skip(ctx, request), fields(reconciliation_id = %request.reconciliation_id))]
pub(crate) async fn persist_finalize(
    ctx: &ServiceContext,
    request: FinalizeRequest,
) -> Result<FinalizedReconciliation, ReconciliationError> {
    ctx.store
        .finalize_reconciliation(
            request.reconciliation_id,
            request.statement_ending_balance,
            request.adjusted_book_balance,
            request.difference,
            &ctx.user_id,
        )
        .await
        .map_err(|e| ReconciliationError::persistence(Operation::Finalize, e))
}

pub(crate) async fn history(
    ctx: &ServiceContext,
    bank_account_id: Uuid,
    page: u32,
) -> Result<HistoryPage, ReconciliationError> {
    let page_size = ctx.config.history_page_size;
    retry_call(&ctx.config.store_retry, "list_reconciliations", || {
        ctx.store
            .list_reconciliations(bank_account_id, page, page_size)
    })
    .await
    .map_err(|e| ReconciliationError::persistence(Operation::History, e))
}
