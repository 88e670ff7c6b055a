use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::entry::{Column, Entry, Tag};
use crate::error::LedgerError;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A balanced group of entries with cached primary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<TransactionId>,
    pub description: String,
    pub comment: Option<String>,
    pub tags: Vec<String>,
    entries: Vec<Entry>,
    date: NaiveDate,
    amount: Money,
    credit: String,
    debit: String,
}

fn column_total(entries: &[Entry], column: Column) -> Money {
    entries
        .iter()
        .filter(|e| e.column == column)
        .map(|e| e.amount)
        .sum()
}

fn joined_accounts(entries: &[Entry], column: Column) -> String {
    entries
        .iter()
        .filter(|e| e.column == column)
        .map(|e| e.account.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

impl Transaction {
    /// Entry order is preserved exactly as given.
    pub fn new(description: &str, entries: Vec<Entry>) -> Result<Self, LedgerError> {
        if entries.len() < 2 {
            return Err(LedgerError::TooFewEntries);
        }

        let credits = column_total(&entries, Column::Credit);
        let debits = column_total(&entries, Column::Debit);
        if credits != debits {
            return Err(LedgerError::Unbalanced { debits, credits });
        }

        let date = entries
            .iter()
            .map(|e| e.date)
            .min()
            .ok_or(LedgerError::TooFewEntries)?;

        Ok(Transaction {
            id: None,
            description: description.to_string(),
            comment: None,
            tags: Vec::new(),
            credit: joined_accounts(&entries, Column::Credit),
            debit: joined_accounts(&entries, Column::Debit),
            entries,
            date,
            amount: credits,
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Removes `tag` from every entry; returns how many entries carried it.
    pub fn clear_entry_tag(&mut self, tag: Tag) -> usize {
        let mut cleared = 0;
        for entry in &mut self.entries {
            if entry.tags.remove(&tag) {
                cleared += 1;
            }
        }
        cleared
    }

    /// Records the stored id on the transaction and on every entry.
    pub fn assign_id(&mut self, id: TransactionId) {
        self.id = Some(id);
        for entry in &mut self.entries {
            entry.transaction = Some(id);
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    /// `/`-joined credit-side account names.
    pub fn credit(&self) -> &str {
        &self.credit
    }

    /// `/`-joined debit-side account names.
    pub fn debit(&self) -> &str {
        &self.debit
    }

    pub fn accounts(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.account.as_str()).collect()
    }

    pub fn credits(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.column == Column::Credit)
    }

    pub fn debits(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.column == Column::Debit)
    }

    pub fn originals(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn is_balanced(&self) -> bool {
        column_total(&self.entries, Column::Credit) == column_total(&self.entries, Column::Debit)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} -> {}",
            self.date, self.description, self.amount, self.credit, self.debit
        )
    }
}
