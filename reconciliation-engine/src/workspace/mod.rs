//! The reconciliation workspace: a single task that owns the session.
//!
//! Callers talk to it through a [`WorkspaceHandle`]. Service calls run in
//! spawned tasks and report back over an internal channel, tagged with the
//! load epoch they started under; a completion from an older epoch is
//! discarded instead of overwriting newer state.

mod tasks;
mod view;

pub use view::{MatchOutcome, WorkspaceView};

use crate::config::ReconciliationConfig;
use crate::engine::{LoadedState, PoolKind, ReconciliationSession, TransactionPools};
use crate::error::{Operation, ReconciliationError};
use crate::models::{FinalizedReconciliation, HistoryPage};
use crate::services::metrics::{
    record_error, record_reconciliation_operation, record_stale_result,
    record_transactions_transitioned,
};
use crate::services::{LedgerBalanceSource, ReconciliationStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tasks::{MutationOutcome, ServiceContext};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, ReconciliationError>>;

enum Command {
    Load {
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
        reply: Reply<()>,
    },
    SetChecked {
        pool: PoolKind,
        row: usize,
        checked: bool,
        reply: oneshot::Sender<bool>,
    },
    SetAllChecked {
        pool: PoolKind,
        checked: bool,
        reply: oneshot::Sender<()>,
    },
    SetStatementEndingBalance {
        amount: Decimal,
        reply: Reply<()>,
    },
    Match {
        ids: Option<Vec<Uuid>>,
        reply: Reply<MatchOutcome>,
    },
    Unmatch {
        ids: Option<Vec<Uuid>>,
        reply: Reply<MatchOutcome>,
    },
    Finalize {
        reply: Reply<FinalizedReconciliation>,
    },
    Refresh {
        reply: Reply<()>,
    },
    History {
        bank_account_id: Uuid,
        page: u32,
        reply: Reply<HistoryPage>,
    },
}

enum Completion {
    Loaded {
        epoch: u64,
        result: Result<LoadedState, ReconciliationError>,
        reply: Reply<()>,
    },
    Mutated {
        epoch: u64,
        operation: Operation,
        transaction_count: usize,
        outcome: MutationOutcome,
        reply: Reply<MatchOutcome>,
    },
    Finalized {
        epoch: u64,
        result: Result<FinalizedReconciliation, ReconciliationError>,
        reply: Reply<FinalizedReconciliation>,
    },
    Refreshed {
        epoch: u64,
        result: Result<TransactionPools, ReconciliationError>,
        reply: Reply<()>,
    },
}

pub struct ReconciliationWorkspace {
    session: ReconciliationSession,
    ctx: Arc<ServiceContext>,
    epoch: u64,
    in_flight: Option<Operation>,
    last_error: Option<ReconciliationError>,
    stale_discarded: u64,
    view_tx: watch::Sender<WorkspaceView>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    shutdown: CancellationToken,
}

impl ReconciliationWorkspace {
    /// Start the workspace task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: Arc<dyn ReconciliationStore>,
        ledger: Arc<dyn LedgerBalanceSource>,
        config: ReconciliationConfig,
        user_id: impl Into<String>,
    ) -> WorkspaceHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(WorkspaceView::default());
        let shutdown = CancellationToken::new();

        let workspace = Self {
            session: ReconciliationSession::default(),
            ctx: Arc::new(ServiceContext {
                store,
                ledger,
                config,
                user_id: user_id.into(),
            }),
            epoch: 0,
            in_flight: None,
            last_error: None,
            stale_discarded: 0,
            view_tx,
            completion_tx,
            shutdown: shutdown.clone(),
        };

        tokio::spawn(workspace.run(command_rx, completion_rx));

        WorkspaceHandle {
            commands: command_tx,
            view: view_rx,
            shutdown,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(
            service = %self.ctx.config.service_name,
            user_id = %self.ctx.user_id,
            "Reconciliation workspace started"
        );
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Reconciliation workspace shutting down");
                    break;
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            info!("All workspace handles dropped, exiting");
                            break;
                        }
                    }
                }
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion);
                }
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load {
                bank_account_id,
                statement_date,
                statement_ending_balance,
                reply,
            } => self.start_load(
                bank_account_id,
                statement_date,
                statement_ending_balance,
                reply,
            ),
            Command::SetChecked {
                pool,
                row,
                checked,
                reply,
            } => {
                let applied = self.session.set_checked(pool, row, checked);
                if applied {
                    self.publish();
                } else {
                    debug!(pool = ?pool, row = row, "Ignoring out-of-range row");
                }
                let _ = reply.send(applied);
            }
            Command::SetAllChecked {
                pool,
                checked,
                reply,
            } => {
                self.session.set_all_checked(pool, checked);
                self.publish();
                let _ = reply.send(());
            }
            Command::SetStatementEndingBalance { amount, reply } => {
                // A load in flight would overwrite the edit with the draft's balance.
                if self.in_flight == Some(Operation::Load) {
                    debug!("Ignoring ending balance edit while loading");
                    let error = ReconciliationError::Busy(Operation::Load);
                    record_error(error.kind());
                    let _ = reply.send(Err(error));
                    return;
                }
                self.session.set_statement_ending_balance(amount);
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::Match { ids, reply } => self.start_match(ids, reply),
            Command::Unmatch { ids, reply } => self.start_unmatch(ids, reply),
            Command::Finalize { reply } => self.start_finalize(reply),
            Command::Refresh { reply } => self.start_refresh(reply),
            Command::History {
                bank_account_id,
                page,
                reply,
            } => {
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    let result = tasks::history(&ctx, bank_account_id, page).await;
                    record_outcome(Operation::History, &result);
                    let _ = reply.send(result);
                });
            }
        }
    }

    fn start_load(
        &mut self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
        reply: Reply<()>,
    ) {
        self.epoch += 1;
        let epoch = self.epoch;
        info!(
            epoch = epoch,
            bank_account_id = %bank_account_id,
            statement_date = %statement_date,
            "Loading reconciliation"
        );

        self.session
            .begin_load(bank_account_id, statement_date, statement_ending_balance);
        self.begin(Operation::Load);

        let ctx = self.ctx.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result =
                tasks::load(&ctx, bank_account_id, statement_date, statement_ending_balance).await;
            let _ = completions.send(Completion::Loaded {
                epoch,
                result,
                reply,
            });
        });
    }

    fn start_match(&mut self, ids: Option<Vec<Uuid>>, reply: Reply<MatchOutcome>) {
        if let Err(e) = self.ensure_idle() {
            return self.reject(Operation::Match, e, reply);
        }
        let request = match self.session.prepare_match(ids.as_deref()) {
            Ok(request) => request,
            Err(e) => return self.reject(Operation::Match, e, reply),
        };

        let epoch = self.epoch;
        let transaction_count = request.transaction_ids().len();
        info!(
            transaction_count = transaction_count,
            statement_total = %request.statement_total,
            system_total = %request.system_total,
            "Matching transactions"
        );
        self.begin(Operation::Match);

        let ctx = self.ctx.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = tasks::persist_match(&ctx, request).await;
            let _ = completions.send(Completion::Mutated {
                epoch,
                operation: Operation::Match,
                transaction_count,
                outcome,
                reply,
            });
        });
    }

    fn start_unmatch(&mut self, ids: Option<Vec<Uuid>>, reply: Reply<MatchOutcome>) {
        if let Err(e) = self.ensure_idle() {
            return self.reject(Operation::Unmatch, e, reply);
        }
        let request = match self.session.prepare_unmatch(ids.as_deref()) {
            Ok(request) => request,
            Err(e) => return self.reject(Operation::Unmatch, e, reply),
        };

        let epoch = self.epoch;
        let transaction_count = request.transaction_ids.len();
        info!(transaction_count = transaction_count, "Unmatching transactions");
        self.begin(Operation::Unmatch);

        let ctx = self.ctx.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = tasks::persist_unmatch(&ctx, request).await;
            let _ = completions.send(Completion::Mutated {
                epoch,
                operation: Operation::Unmatch,
                transaction_count,
                outcome,
                reply,
            });
        });
    }

    fn start_finalize(&mut self, reply: Reply<FinalizedReconciliation>) {
        if let Err(e) = self.ensure_idle() {
            return self.reject(Operation::Finalize, e, reply);
        }
        let request = match self.session.prepare_finalize() {
            Ok(request) => request,
            Err(e) => return self.reject(Operation::Finalize, e, reply),
        };

        let epoch = self.epoch;
        info!(
            reconciliation_id = %request.reconciliation_id,
            difference = %request.difference,
            "Finalizing reconciliation"
        );
        self.begin(Operation::Finalize);

        let ctx = self.ctx.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = tasks::persist_finalize(&ctx, request).await;
            let _ = completions.send(Completion::Finalized {
                epoch,
                result,
                reply,
            });
        });
    }

    fn start_refresh(&mut self, reply: Reply<()>) {
        if let Err(e) = self.ensure_idle() {
            return self.reject(Operation::Refresh, e, reply);
        }
        let scope = match self.session.refresh_scope() {
            Ok(scope) => scope,
            Err(e) => return self.reject(Operation::Refresh, e, reply),
        };

        let epoch = self.epoch;
        self.begin(Operation::Refresh);

        let ctx = self.ctx.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = tasks::fetch_pools(&ctx, Operation::Refresh, scope).await;
            let _ = completions.send(Completion::Refreshed {
                epoch,
                result,
                reply,
            });
        });
    }

    fn ensure_idle(&self) -> Result<(), ReconciliationError> {
        match self.in_flight {
            Some(operation) => Err(ReconciliationError::Busy(operation)),
            None => Ok(()),
        }
    }

    fn begin(&mut self, operation: Operation) {
        self.in_flight = Some(operation);
        self.last_error = None;
        self.publish();
    }

    /// Fail a command before anything was dispatched.
    fn reject<T>(&mut self, operation: Operation, error: ReconciliationError, reply: Reply<T>) {
        debug!(operation = %operation, error = %error, "Operation rejected");
        record_reconciliation_operation(operation.as_str(), "rejected");
        record_error(error.kind());
        self.last_error = Some(error.clone());
        self.publish();
        let _ = reply.send(Err(error));
    }

    // =========================================================================
    // Completions
    // =========================================================================

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Loaded {
                epoch,
                result,
                reply,
            } => {
                if self.is_stale(epoch, Operation::Load) {
                    let _ = reply.send(Err(ReconciliationError::Superseded));
                    return;
                }
                record_outcome(Operation::Load, &result);
                let result = result.map(|state| self.session.apply_load(state));
                self.finish(result, reply);
            }
            Completion::Mutated {
                epoch,
                operation,
                transaction_count,
                outcome,
                reply,
            } => {
                let stale = self.is_stale(epoch, operation);
                let result = match outcome {
                    MutationOutcome::Failed(e) => Err(e),
                    MutationOutcome::Persisted { pools } => {
                        record_transactions_transitioned(operation.as_str(), transaction_count);
                        let refreshed = match pools {
                            Ok(pools) if !stale => {
                                self.session.apply_pools(pools);
                                true
                            }
                            Ok(_) => false,
                            Err(e) => {
                                warn!(
                                    operation = %operation,
                                    error = %e,
                                    "Refresh after persisted change failed"
                                );
                                if !stale {
                                    self.last_error = Some(e);
                                }
                                false
                            }
                        };
                        Ok(MatchOutcome {
                            operation,
                            transaction_count,
                            refreshed,
                        })
                    }
                };
                record_outcome(operation, &result);
                if stale {
                    let _ = reply.send(result);
                    return;
                }
                self.finish(result, reply);
            }
            Completion::Finalized {
                epoch,
                result,
                reply,
            } => {
                record_outcome(Operation::Finalize, &result);
                if let Ok(record) = &result {
                    record_transactions_transitioned(
                        Operation::Finalize.as_str(),
                        record.matched_count,
                    );
                }
                if epoch != self.epoch {
                    match &result {
                        // A reload with the same parameters resumed the draft
                        // this call just closed.
                        Ok(record)
                            if self.session.reconciliation_id()
                                == Some(record.reconciliation_id) =>
                        {
                            info!(
                                reconciliation_id = %record.reconciliation_id,
                                started_epoch = epoch,
                                current_epoch = self.epoch,
                                "Finalize completed for the reloaded draft"
                            );
                            self.session.complete_finalize(record.clone());
                            self.publish();
                        }
                        _ => {
                            self.is_stale(epoch, Operation::Finalize);
                        }
                    }
                    let _ = reply.send(result);
                    return;
                }
                if let Ok(record) = &result {
                    self.session.complete_finalize(record.clone());
                }
                self.finish(result, reply);
            }
            Completion::Refreshed {
                epoch,
                result,
                reply,
            } => {
                if self.is_stale(epoch, Operation::Refresh) {
                    let _ = reply.send(Err(ReconciliationError::Superseded));
                    return;
                }
                record_outcome(Operation::Refresh, &result);
                let result = result.map(|pools| self.session.apply_pools(pools));
                self.finish(result, reply);
            }
        }
    }

    fn is_stale(&mut self, epoch: u64, operation: Operation) -> bool {
        if epoch == self.epoch {
            return false;
        }
        warn!(
            operation = %operation,
            started_epoch = epoch,
            current_epoch = self.epoch,
            "Discarding stale result"
        );
        self.stale_discarded += 1;
        record_stale_result(operation.as_str());
        self.publish();
        true
    }

    /// Clear the in-flight marker and reply, whatever the outcome.
    fn finish<T>(&mut self, result: Result<T, ReconciliationError>, reply: Reply<T>) {
        self.in_flight = None;
        if let Err(e) = &result {
            self.last_error = Some(e.clone());
        }
        self.publish();
        let _ = reply.send(result);
    }

    fn publish(&self) {
        self.view_tx.send_replace(WorkspaceView::capture(
            &self.session,
            self.in_flight,
            self.last_error.clone(),
            self.epoch,
            self.stale_discarded,
        ));
    }
}

fn record_outcome<T>(operation: Operation, result: &Result<T, ReconciliationError>) {
    match result {
        Ok(_) => record_reconciliation_operation(operation.as_str(), "success"),
        Err(e) => {
            record_reconciliation_operation(operation.as_str(), "failure");
            record_error(e.kind());
        }
    }
}

/// Cloneable handle to a running [`ReconciliationWorkspace`].
#[derive(Clone)]
pub struct WorkspaceHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<WorkspaceView>,
    shutdown: CancellationToken,
}

impl WorkspaceHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ReconciliationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ReconciliationError::WorkspaceClosed)?;
        response
            .await
            .map_err(|_| ReconciliationError::WorkspaceClosed)
    }

    /// Load (or resume) the draft for these parameters. A load that is
    /// overtaken by a newer one resolves to `Superseded`.
    pub async fn load(
        &self,
        bank_account_id: Uuid,
        statement_date: NaiveDate,
        statement_ending_balance: Decimal,
    ) -> Result<(), ReconciliationError> {
        self.call(|reply| Command::Load {
            bank_account_id,
            statement_date,
            statement_ending_balance,
            reply,
        })
        .await?
    }

    /// Returns false when `row` is out of range.
    pub async fn set_checked(
        &self,
        pool: PoolKind,
        row: usize,
        checked: bool,
    ) -> Result<bool, ReconciliationError> {
        self.call(|reply| Command::SetChecked {
            pool,
            row,
            checked,
            reply,
        })
        .await
    }

    pub async fn set_all_checked(
        &self,
        pool: PoolKind,
        checked: bool,
    ) -> Result<(), ReconciliationError> {
        self.call(|reply| Command::SetAllChecked {
            pool,
            checked,
            reply,
        })
        .await
    }

    /// Rejected with `Busy` while a load is in flight.
    pub async fn set_statement_ending_balance(
        &self,
        amount: Decimal,
    ) -> Result<(), ReconciliationError> {
        self.call(|reply| Command::SetStatementEndingBalance { amount, reply })
            .await?
    }

    /// Match the checked rows of the two unreconciled pools.
    pub async fn match_selected(&self) -> Result<MatchOutcome, ReconciliationError> {
        self.call(|reply| Command::Match { ids: None, reply })
            .await?
    }

    pub async fn match_ids(&self, ids: Vec<Uuid>) -> Result<MatchOutcome, ReconciliationError> {
        self.call(|reply| Command::Match {
            ids: Some(ids),
            reply,
        })
        .await?
    }

    /// Unmatch the checked rows of the provisionally matched pools.
    pub async fn unmatch_selected(&self) -> Result<MatchOutcome, ReconciliationError> {
        self.call(|reply| Command::Unmatch { ids: None, reply })
            .await?
    }

    pub async fn unmatch_ids(&self, ids: Vec<Uuid>) -> Result<MatchOutcome, ReconciliationError> {
        self.call(|reply| Command::Unmatch {
            ids: Some(ids),
            reply,
        })
        .await?
    }

    pub async fn finalize(&self) -> Result<FinalizedReconciliation, ReconciliationError> {
        self.call(|reply| Command::Finalize { reply }).await?
    }

    /// Re-fetch both pools of the active draft.
    pub async fn refresh(&self) -> Result<(), ReconciliationError> {
        self.call(|reply| Command::Refresh { reply }).await?
    }

    /// `page` is 1-based.
    pub async fn history(
        &self,
        bank_account_id: Uuid,
        page: u32,
    ) -> Result<HistoryPage, ReconciliationError> {
        self.call(|reply| Command::History {
            bank_account_id,
            page,
            reply,
        })
        .await?
    }

    pub fn view(&self) -> WorkspaceView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkspaceView> {
        self.view.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
