use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Unbalanced transaction: debits={debits}, credits={credits}")]
    Unbalanced { debits: Money, credits: Money },
    #[error("Transaction must have at least two entries")]
    TooFewEntries,
    #[error("Account not found: {0}")]
    UnknownAccount(String),
    #[error("Duplicate account name: {0}")]
    DuplicateAccount(String),
    #[error("Unknown account category: '{0}'")]
    UnknownCategory(String),
    #[error("Unknown tag: '{0}'")]
    UnknownTag(String),
    #[error("Unknown column: '{0}' (expected credit or debit)")]
    UnknownColumn(String),
    #[error("Unknown rule action: '{0}'")]
    UnknownAction(String),
    #[error("Entry amounts must be non-negative, got {0}")]
    NegativeAmount(Money),
}

/// Failures reported by a [`crate::LedgerStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored data is invalid: {0}")]
    Corrupt(#[from] LedgerError),
    #[error("Store lock poisoned")]
    Poisoned,
}
