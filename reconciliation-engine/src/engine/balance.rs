use crate::engine::pool::TransactionPool;
use crate::engine::tolerance::Tolerance;
use crate::models::{ReconciliationState, TransactionRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book-versus-bank comparison derived from the unreconciled pools.
///
/// Only unchecked, still-unreconciled rows count as outstanding items; checked
/// rows are about to be matched away and would otherwise be counted twice.
/// When the ledger balance is unknown the book side and the difference are
/// `None` rather than computed against zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub book_balance_gl: Option<Decimal>,
    pub interest_or_credits_on_statement_only: Decimal,
    pub charges_or_debits_on_statement_only: Decimal,
    pub deposits_in_transit: Decimal,
    pub outstanding_withdrawals: Decimal,
    pub statement_ending_balance: Decimal,
    pub adjusted_book_balance: Option<Decimal>,
    pub adjusted_bank_balance: Decimal,
    pub difference: Option<Decimal>,
}

impl BalanceSnapshot {
    pub fn compute(
        statement: &TransactionPool,
        system: &TransactionPool,
        book_balance_gl: Option<Decimal>,
        statement_ending_balance: Decimal,
    ) -> Self {
        let (interest_or_credits_on_statement_only, charges_or_debits_on_statement_only) =
            split_outstanding(statement.unchecked());
        let (deposits_in_transit, outstanding_withdrawals) = split_outstanding(system.unchecked());

        let adjusted_book_balance = book_balance_gl.map(|book| {
            book + interest_or_credits_on_statement_only - charges_or_debits_on_statement_only
        });
        let adjusted_bank_balance =
            statement_ending_balance + deposits_in_transit - outstanding_withdrawals;
        let difference = adjusted_book_balance.map(|book| adjusted_bank_balance - book);

        Self {
            book_balance_gl,
            interest_or_credits_on_statement_only,
            charges_or_debits_on_statement_only,
            deposits_in_transit,
            outstanding_withdrawals,
            statement_ending_balance,
            adjusted_book_balance,
            adjusted_bank_balance,
            difference,
        }
    }

    /// False while the ledger balance is missing.
    pub fn is_complete(&self) -> bool {
        self.book_balance_gl.is_some()
    }

    /// Never true for incomplete data.
    pub fn is_zero_difference(&self, tolerance: Tolerance) -> bool {
        self.difference.is_some_and(|d| tolerance.is_zero(d))
    }
}

impl Default for BalanceSnapshot {
    fn default() -> Self {
        Self {
            book_balance_gl: None,
            interest_or_credits_on_statement_only: Decimal::ZERO,
            charges_or_debits_on_statement_only: Decimal::ZERO,
            deposits_in_transit: Decimal::ZERO,
            outstanding_withdrawals: Decimal::ZERO,
            statement_ending_balance: Decimal::ZERO,
            adjusted_book_balance: None,
            adjusted_bank_balance: Decimal::ZERO,
            difference: None,
        }
    }
}

/// (inflows, absolute outflows) over unreconciled records.
fn split_outstanding<'a>(records: impl Iterator<Item = &'a TransactionRecord>) -> (Decimal, Decimal) {
    records
        .filter(|r| r.state == ReconciliationState::Unreconciled)
        .fold((Decimal::ZERO, Decimal::ZERO), |(inflow, outflow), r| {
            if r.amount > Decimal::ZERO {
                (inflow + r.amount, outflow)
            } else {
                (inflow, outflow + r.amount.abs())
            }
        })
}
