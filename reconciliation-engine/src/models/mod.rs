//! Domain models for reconciliation-engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Bank Account Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank_account_id: Uuid,
    pub ledger_account_id: Uuid,
    pub bank_name: String,
    pub currency: String,
    pub last_reconciled_date: Option<NaiveDate>,
    pub last_reconciled_balance: Option<Decimal>,
}

impl BankAccount {
    pub fn new(ledger_account_id: Uuid, bank_name: &str, currency: &str) -> Self {
        Self {
            bank_account_id: Uuid::new_v4(),
            ledger_account_id,
            bank_name: bank_name.to_string(),
            currency: currency.to_string(),
            last_reconciled_date: None,
            last_reconciled_balance: None,
        }
    }
}

/// Number of decimal places in the currency's minor unit (ISO 4217).
pub fn minor_units_for_currency(code: &str) -> u32 {
    match code.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
        _ => 2,
    }
}

// ============================================================================
// Transaction Models
// ============================================================================

/// Which pool a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSide {
    Statement,
    System,
}

impl TransactionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for TransactionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    Unreconciled,
    ProvisionallyMatched,
    Finalized,
}

impl ReconciliationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreconciled => "unreconciled",
            Self::ProvisionallyMatched => "provisionally_matched",
            Self::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One candidate line, from the bank statement or from the books.
///
/// Positive amounts are inflows, negative amounts outflows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub amount: Decimal,
    pub side: TransactionSide,
    pub state: ReconciliationState,
}

impl TransactionRecord {
    pub fn new(
        side: TransactionSide,
        transaction_date: NaiveDate,
        description: &str,
        amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_date,
            description: description.to_string(),
            reference: None,
            amount,
            side,
            state: ReconciliationState::Unreconciled,
        }
    }

    pub fn statement(transaction_date: NaiveDate, description: &str, amount: Decimal) -> Self {
        Self::new(TransactionSide::Statement, transaction_date, description, amount)
    }

    pub fn system(transaction_date: NaiveDate, description: &str, amount: Decimal) -> Self {
        Self::new(TransactionSide::System, transaction_date, description, amount)
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

/// Records returned by the store, already split by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionSplit {
    pub statement: Vec<TransactionRecord>,
    pub system: Vec<TransactionRecord>,
}

impl TransactionSplit {
    pub fn from_records(records: impl IntoIterator<Item = TransactionRecord>) -> Self {
        let (statement, system) = records
            .into_iter()
            .partition(|r| r.side == TransactionSide::Statement);
        Self { statement, system }
    }

    pub fn len(&self) -> usize {
        self.statement.len() + self.system.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_empty() && self.system.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.statement.iter().chain(self.system.iter()).map(|r| r.id)
    }
}

// ============================================================================
// Reconciliation Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    InProgress,
    Finalized,
    Abandoned,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Finalized => "finalized",
            Self::Abandoned => "abandoned",
        }
    }
}

/// The persisted part of a draft reconciliation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReconciliation {
    pub reconciliation_id: Uuid,
    pub bank_account_id: Uuid,
    pub statement_date: NaiveDate,
    pub statement_ending_balance: Decimal,
    pub status: DraftStatus,
    pub created_by: String,
    pub started_utc: DateTime<Utc>,
}

/// Permanent record written by a successful finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedReconciliation {
    pub reconciliation_id: Uuid,
    pub bank_account_id: Uuid,
    pub statement_date: NaiveDate,
    pub statement_ending_balance: Decimal,
    pub adjusted_book_balance: Decimal,
    pub difference: Decimal,
    pub matched_count: usize,
    pub finalized_by: String,
    pub completed_utc: DateTime<Utc>,
}

/// One row of reconciliation history for a bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub reconciliation_id: Uuid,
    pub bank_account_id: Uuid,
    pub statement_date: NaiveDate,
    pub statement_ending_balance: Decimal,
    pub adjusted_book_balance: Option<Decimal>,
    pub difference: Option<Decimal>,
    pub status: DraftStatus,
    pub matched_count: usize,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<ReconciliationSummary>,
    pub total_count: u64,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl HistoryPage {
    pub fn total_pages(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size as u64) as u32
    }
}
