use crate::models::{TransactionRecord, TransactionSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record together with its checked flag, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRow {
    pub record: TransactionRecord,
    pub checked: bool,
}

/// Ordered records for one side with a per-row checked flag.
///
/// `revision` increases on every applied change so observers can tell that
/// the pool moved.
#[derive(Debug, Clone)]
pub struct TransactionPool {
    side: TransactionSide,
    rows: Vec<TransactionRecord>,
    checked: Vec<bool>,
    revision: u64,
}

impl TransactionPool {
    pub fn new(side: TransactionSide) -> Self {
        Self {
            side,
            rows: Vec::new(),
            checked: Vec::new(),
            revision: 0,
        }
    }

    pub fn side(&self) -> TransactionSide {
        self.side
    }

    /// Replace every row and clear all checked flags.
    pub fn replace_pool(&mut self, records: Vec<TransactionRecord>) {
        let side = self.side;
        let (rows, foreign): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.side == side);
        if !foreign.is_empty() {
            tracing::warn!(
                side = %side,
                dropped = foreign.len(),
                "Dropping records that belong to the other side"
            );
        }

        self.checked = vec![false; rows.len()];
        self.rows = rows;
        self.revision += 1;
    }

    /// Returns false, changing nothing, when `row` is out of range.
    pub fn set_checked(&mut self, row: usize, checked: bool) -> bool {
        match self.checked.get_mut(row) {
            Some(flag) => {
                *flag = checked;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_all_checked(&mut self, checked: bool) {
        self.checked.iter_mut().for_each(|flag| *flag = checked);
        self.revision += 1;
    }

    /// Checked rows, in pool order.
    pub fn checked_rows(&self) -> Vec<&TransactionRecord> {
        self.rows
            .iter()
            .zip(&self.checked)
            .filter(|(_, checked)| **checked)
            .map(|(record, _)| record)
            .collect()
    }

    pub fn checked_ids(&self) -> Vec<Uuid> {
        self.checked_rows().into_iter().map(|r| r.id).collect()
    }

    /// Sum of checked amounts; zero for an empty selection.
    pub fn checked_sum(&self) -> Decimal {
        self.checked_rows().into_iter().map(|r| r.amount).sum()
    }

    pub fn checked_count(&self) -> usize {
        self.checked.iter().filter(|c| **c).count()
    }

    pub fn unchecked(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.rows
            .iter()
            .zip(&self.checked)
            .filter(|(_, checked)| !**checked)
            .map(|(record, _)| record)
    }

    pub fn find(&self, id: Uuid) -> Option<&TransactionRecord> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn rows(&self) -> &[TransactionRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> Vec<PoolRow> {
        self.rows
            .iter()
            .zip(&self.checked)
            .map(|(record, checked)| PoolRow {
                record: record.clone(),
                checked: *checked,
            })
            .collect()
    }
}
