use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;
use crate::money::Money;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Credit,
    Debit,
}

impl Column {
    pub fn opposite(self) -> Column {
        match self {
            Column::Credit => Column::Debit,
            Column::Debit => Column::Credit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Credit => "credit",
            Column::Debit => "debit",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" | "cr" => Ok(Column::Credit),
            "debit" | "dr" => Ok(Column::Debit),
            other => Err(LedgerError::UnknownColumn(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    /// Synthetic budget-allocation entry.
    Budget,
    /// Awaiting reconciliation against a settlement.
    Pending,
    /// Not yet matched into a transaction.
    Unpaired,
    /// Settlement side of a reconciling instrument.
    Settlement,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Budget, Tag::Pending, Tag::Unpaired, Tag::Settlement];

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Budget => "#budget",
            Tag::Pending => "#pending",
            Tag::Unpaired => "#unpaired",
            Tag::Settlement => "#xfer",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let bare = name.strip_prefix('#').unwrap_or(name);
        if bare == "transfer-settlement" {
            return Ok(Tag::Settlement);
        }
        Tag::ALL
            .into_iter()
            .find(|tag| tag.as_str().strip_prefix('#') == Some(bare))
            .ok_or_else(|| LedgerError::UnknownTag(s.to_string()))
    }
}

/// Content hash identifying an entry for de-duplication.
pub fn compute_uid(account: &str, date: NaiveDate, amount: Money, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update([0x1f]);
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(amount.plain().as_bytes());
    hasher.update([0x1f]);
    hasher.update(description.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// One side of a posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub uid: String,
    pub date: NaiveDate,
    pub description: String,
    pub account: String,
    pub column: Column,
    pub amount: Money,
    pub tags: BTreeSet<Tag>,
    pub transaction: Option<TransactionId>,
}

impl Entry {
    /// Builds an untagged entry and computes its uid. Negative amounts are
    /// rejected; the column carries the sign.
    pub fn new(
        date: NaiveDate,
        description: &str,
        account: &str,
        column: Column,
        amount: Money,
    ) -> Result<Self, LedgerError> {
        if amount.is_negative() {
            return Err(LedgerError::NegativeAmount(amount));
        }
        Ok(Entry {
            uid: compute_uid(account, date, amount, description),
            date,
            description: description.to_string(),
            account: account.to_string(),
            column,
            amount,
            tags: BTreeSet::new(),
            transaction: None,
        })
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Signed view: debits positive, credits negative.
    pub fn value(&self) -> Money {
        match self.column {
            Column::Debit => self.amount,
            Column::Credit => -self.amount,
        }
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_unpaired(&self) -> bool {
        self.has_tag(Tag::Unpaired)
    }

    pub fn rehash(&mut self) {
        self.uid = compute_uid(&self.account, self.date, self.amount, &self.description);
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.date, self.account, self.column, self.amount, self.description
        )?;
        for tag in &self.tags {
            write!(f, " {tag}")?;
        }
        Ok(())
    }
}
