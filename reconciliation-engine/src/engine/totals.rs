use crate::engine::pool::TransactionPool;
use crate::engine::tolerance::Tolerance;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionState {
    /// Nothing checked on either side.
    Neutral,
    Balanced,
    Unbalanced,
}

/// Running totals of the checked rows in the two unreconciled pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionTotals {
    pub statement_selected_total: Decimal,
    pub system_selected_total: Decimal,
    pub statement_selected_count: usize,
    pub system_selected_count: usize,
    pub is_balanced: bool,
    pub state: SelectionState,
}

impl SelectionTotals {
    pub fn compute(
        statement: &TransactionPool,
        system: &TransactionPool,
        tolerance: Tolerance,
    ) -> Self {
        let statement_selected_total = statement.checked_sum();
        let system_selected_total = system.checked_sum();
        let statement_selected_count = statement.checked_count();
        let system_selected_count = system.checked_count();

        let is_balanced = tolerance.amounts_equal(statement_selected_total, system_selected_total);
        let state = if statement_selected_count == 0 && system_selected_count == 0 {
            SelectionState::Neutral
        } else if is_balanced {
            SelectionState::Balanced
        } else {
            SelectionState::Unbalanced
        };

        Self {
            statement_selected_total,
            system_selected_total,
            statement_selected_count,
            system_selected_count,
            is_balanced,
            state,
        }
    }

    pub fn difference(&self) -> Decimal {
        self.statement_selected_total - self.system_selected_total
    }

    /// Whether Match should be offered.
    pub fn can_match(&self) -> bool {
        self.state == SelectionState::Balanced
            && self.statement_selected_count > 0
            && self.system_selected_count > 0
    }
}

impl Default for SelectionTotals {
    fn default() -> Self {
        Self {
            statement_selected_total: Decimal::ZERO,
            system_selected_total: Decimal::ZERO,
            statement_selected_count: 0,
            system_selected_count: 0,
            is_balanced: true,
            state: SelectionState::Neutral,
        }
    }
}
