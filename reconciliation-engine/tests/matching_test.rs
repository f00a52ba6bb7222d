//! Match and unmatch through the workspace handle.

mod common;

use common::{dec, seed_store, spawn_workspace, statement_date};
use reconciliation_engine::engine::{PoolKind, SelectionState};
use reconciliation_engine::models::ReconciliationState;
use reconciliation_engine::{Operation, ReconciliationError};
use std::collections::HashSet;
use tokio_test::assert_ok;
use uuid::Uuid;

fn ids(rows: &[reconciliation_engine::engine::PoolRow]) -> HashSet<Uuid> {
    rows.iter().map(|row| row.record.id).collect()
}

#[tokio::test]
async fn many_to_one_selection_matches_and_refreshes() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    assert_ok!(
        handle
            .load(seeded.bank_account_id, statement_date(), dec(100000))
            .await
    );

    let view = handle.view();
    let deposit = view
        .position(PoolKind::UnreconciledStatement, seeded.deposit)
        .unwrap();
    let fee = view
        .position(PoolKind::UnreconciledStatement, seeded.fee)
        .unwrap();
    let receipt = view
        .position(PoolKind::UnreconciledSystem, seeded.receipt)
        .unwrap();

    assert!(handle
        .set_checked(PoolKind::UnreconciledStatement, deposit, true)
        .await
        .unwrap());
    assert!(handle
        .set_checked(PoolKind::UnreconciledStatement, fee, true)
        .await
        .unwrap());
    assert!(handle
        .set_checked(PoolKind::UnreconciledSystem, receipt, true)
        .await
        .unwrap());

    let view = handle.view();
    assert_eq!(view.totals.statement_selected_total, dec(9500));
    assert_eq!(view.totals.system_selected_total, dec(9500));
    assert!(view.totals.is_balanced);
    assert_eq!(view.totals.state, SelectionState::Balanced);

    let outcome = handle.match_selected().await.unwrap();
    assert_eq!(outcome.operation, Operation::Match);
    assert_eq!(outcome.transaction_count, 3);
    assert!(outcome.refreshed);

    let view = handle.view();
    assert!(view.unreconciled_statement.is_empty());
    assert!(view.unreconciled_system.is_empty());
    assert_eq!(
        ids(&view.matched_statement),
        HashSet::from([seeded.deposit, seeded.fee])
    );
    assert_eq!(ids(&view.matched_system), HashSet::from([seeded.receipt]));
    assert_eq!(view.totals.state, SelectionState::Neutral);
    assert!(view.in_flight.is_none());

    let stored = seeded.store.transaction(seeded.fee).await.unwrap();
    assert_eq!(stored.state, ReconciliationState::ProvisionallyMatched);
}

#[tokio::test]
async fn unbalanced_selection_is_rejected_with_both_sums() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    let view = handle.view();
    let deposit = view
        .position(PoolKind::UnreconciledStatement, seeded.deposit)
        .unwrap();
    handle
        .set_checked(PoolKind::UnreconciledStatement, deposit, true)
        .await
        .unwrap();
    handle
        .set_all_checked(PoolKind::UnreconciledSystem, true)
        .await
        .unwrap();

    let err = handle.match_selected().await.unwrap_err();
    assert_eq!(
        err,
        ReconciliationError::UnbalancedSelection {
            statement_total: dec(10000),
            system_total: dec(9500),
        }
    );

    let view = handle.view();
    assert_eq!(view.unreconciled_statement.len(), 2);
    assert_eq!(view.unreconciled_system.len(), 1);
    assert_eq!(view.last_error, Some(err));
    assert_eq!(
        seeded.store.transaction(seeded.deposit).await.unwrap().state,
        ReconciliationState::Unreconciled
    );
}

#[tokio::test]
async fn one_sided_selection_is_incomplete() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    let err = handle
        .match_ids(vec![seeded.deposit, seeded.fee])
        .await
        .unwrap_err();
    assert_eq!(err, ReconciliationError::IncompleteSelection);
}

#[tokio::test]
async fn unknown_ids_are_rejected_before_persisting() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    let err = handle
        .match_ids(vec![seeded.deposit, seeded.fee, seeded.receipt, stranger])
        .await
        .unwrap_err();

    assert_eq!(err, ReconciliationError::UnknownTransactions(vec![stranger]));
    assert_eq!(
        seeded.store.transaction(seeded.deposit).await.unwrap().state,
        ReconciliationState::Unreconciled
    );
}

#[tokio::test]
async fn match_then_unmatch_restores_pools() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    let before = handle.view();
    let matched = vec![seeded.deposit, seeded.fee, seeded.receipt];

    handle.match_ids(matched.clone()).await.unwrap();
    let outcome = handle.unmatch_ids(matched).await.unwrap();
    assert_eq!(outcome.operation, Operation::Unmatch);
    assert!(outcome.refreshed);

    let after = handle.view();
    assert_eq!(
        ids(&after.unreconciled_statement),
        ids(&before.unreconciled_statement)
    );
    assert_eq!(
        ids(&after.unreconciled_system),
        ids(&before.unreconciled_system)
    );
    assert!(after.matched_statement.is_empty());
    assert!(after.matched_system.is_empty());
    assert_eq!(after.balance, before.balance);

    for id in [seeded.deposit, seeded.fee, seeded.receipt] {
        assert_eq!(
            seeded.store.transaction(id).await.unwrap().state,
            ReconciliationState::Unreconciled
        );
    }
}

#[tokio::test]
async fn partial_unmatch_of_checked_rows() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();
    handle
        .match_ids(vec![seeded.deposit, seeded.fee, seeded.receipt])
        .await
        .unwrap();

    let fee = handle
        .view()
        .position(PoolKind::MatchedStatement, seeded.fee)
        .unwrap();
    handle
        .set_checked(PoolKind::MatchedStatement, fee, true)
        .await
        .unwrap();

    let outcome = handle.unmatch_selected().await.unwrap();
    assert_eq!(outcome.transaction_count, 1);

    let view = handle.view();
    assert_eq!(ids(&view.unreconciled_statement), HashSet::from([seeded.fee]));
    assert_eq!(view.matched_statement.len(), 1);
    assert_eq!(view.matched_system.len(), 1);
}

#[tokio::test]
async fn unmatch_with_nothing_matched_is_empty_selection() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    assert_eq!(
        handle.unmatch_selected().await.unwrap_err(),
        ReconciliationError::EmptySelection
    );
    assert_eq!(
        handle.unmatch_ids(vec![seeded.deposit]).await.unwrap_err(),
        ReconciliationError::EmptySelection
    );
}

#[tokio::test]
async fn match_without_load_has_no_draft() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());

    assert_eq!(
        handle.match_selected().await.unwrap_err(),
        ReconciliationError::NoActiveDraft
    );
}

#[tokio::test]
async fn persistence_failure_surfaces_service_details() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    seeded
        .store
        .fail_next(
            "mark_provisionally_reconciled",
            vec![
                "Period 2024-01 is locked".to_string(),
                "Contact your controller".to_string(),
            ],
        )
        .await;

    let err = handle
        .match_ids(vec![seeded.deposit, seeded.fee, seeded.receipt])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ReconciliationError::PersistenceFailure {
            operation: Operation::Match,
            details: vec![
                "Period 2024-01 is locked".to_string(),
                "Contact your controller".to_string(),
            ],
        }
    );

    let view = handle.view();
    assert!(view.in_flight.is_none());
    assert_eq!(view.unreconciled_statement.len(), 2);
    assert_eq!(view.last_error, Some(err));

    // The busy gate was released, so a retry goes through.
    assert!(handle
        .match_ids(vec![seeded.deposit, seeded.fee, seeded.receipt])
        .await
        .is_ok());
}

#[tokio::test]
async fn unmatch_failure_leaves_matches_in_place() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();
    handle
        .match_ids(vec![seeded.deposit, seeded.fee, seeded.receipt])
        .await
        .unwrap();

    seeded
        .store
        .fail_next(
            "unreconcile_transactions",
            vec!["Period 2024-01 is locked".to_string()],
        )
        .await;

    let err = handle.unmatch_ids(vec![seeded.fee]).await.unwrap_err();
    assert_eq!(
        err,
        ReconciliationError::PersistenceFailure {
            operation: Operation::Unmatch,
            details: vec!["Period 2024-01 is locked".to_string()],
        }
    );

    let view = handle.view();
    assert!(view.in_flight.is_none());
    assert_eq!(view.matched_statement.len(), 2);
    assert_eq!(view.matched_system.len(), 1);
    assert!(view.unreconciled_statement.is_empty());
    assert_eq!(view.last_error, Some(err));
    assert_eq!(
        seeded.store.transaction(seeded.fee).await.unwrap().state,
        ReconciliationState::ProvisionallyMatched
    );

    assert_ok!(handle.unmatch_ids(vec![seeded.fee]).await);
    assert_eq!(handle.view().unreconciled_statement.len(), 1);
}

#[tokio::test]
async fn out_of_range_row_is_ignored() {
    let seeded = seed_store().await;
    let handle = spawn_workspace(seeded.store.clone());
    handle
        .load(seeded.bank_account_id, statement_date(), dec(100000))
        .await
        .unwrap();

    assert!(!handle
        .set_checked(PoolKind::UnreconciledSystem, 7, true)
        .await
        .unwrap());
    assert_eq!(handle.view().totals.state, SelectionState::Neutral);
}
