// 🔌 Storage capabilities - the only two things the pipeline needs from a backend
//
// Lookup: "does anything stored match this predicate?"
// Sink:   "insert these rows as one transaction"
//
// Any backend (SQLite here, something else later) plugs in by implementing both.

use crate::db::CanonicalTransaction;
use crate::error::StoreError;
use chrono::NaiveDateTime;

// ============================================================================
// PREDICATES
// ============================================================================

/// Fields compared by record-level deduplication
///
/// `None` means "not provided" and is left out of the comparison, so a stored
/// row matches when it agrees on every field the incoming record does carry.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupKey<'a> {
    pub date: Option<NaiveDateTime>,
    pub amount: Option<f64>,
    pub balance: Option<f64>,
    pub charges: Option<f64>,
    pub direction: Option<&'a str>,
    /// Accepted masked forms of the account; empty means "not provided"
    pub masked_account_numbers: Vec<&'a str>,
    pub description: Option<&'a str>,
    pub reference: Option<&'a str>,
}

impl<'a> DedupKey<'a> {
    /// Build the key from a masked record; blank strings count as absent
    pub fn from_transaction(tx: &'a CanonicalTransaction) -> Self {
        DedupKey {
            date: tx.date,
            amount: Some(tx.amount),
            balance: tx.balance,
            charges: tx.charges,
            direction: present(&tx.direction),
            masked_account_numbers: present(&tx.masked_account_number).into_iter().collect(),
            description: present(&tx.description),
            reference: present(&tx.reference),
        }
    }

    /// Also accept a stored row carrying `masked` as its account mask
    pub fn or_masked_as(mut self, masked: &'a str) -> Self {
        if !masked.is_empty() && !self.masked_account_numbers.contains(&masked) {
            self.masked_account_numbers.push(masked);
        }
        self
    }

}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Equality lookups the masking/dedup engine issues against storage
#[derive(Debug, Clone, PartialEq)]
pub enum ExistsQuery<'a> {
    /// A stored row carries this masked account number
    MaskedAccount(&'a str),

    /// Rows were already stored for this batch (work order) id
    Batch(&'a str),

    /// A stored row matches every present field of the key
    Transaction(DedupKey<'a>),
}

// ============================================================================
// CAPABILITIES
// ============================================================================

pub trait TransactionLookup {
    fn exists(&self, query: &ExistsQuery<'_>) -> Result<bool, StoreError>;
}

pub trait TransactionSink {
    /// Insert all rows atomically; returns the number inserted
    fn insert_batch(&self, rows: &[CanonicalTransaction]) -> Result<usize, StoreError>;
}
