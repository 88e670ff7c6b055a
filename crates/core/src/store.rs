use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::account::{Account, AccountTable};
use crate::entry::{Column, Entry, Tag};
use crate::error::StoreError;
use crate::money::Money;
use crate::rule::MatchRule;
use crate::transaction::{Transaction, TransactionId};

/// Field predicates for selecting entries. Unset fields match everything;
/// set fields combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub account: Option<String>,
    /// Also match descendants (`name:*`) of `account`.
    pub account_prefix: bool,
    pub tag: Option<Tag>,
    pub column: Option<Column>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_amount: Option<Money>,
    pub max_amount: Option<Money>,
    pub description: Option<String>,
}

impl EntryQuery {
    pub fn tagged(tag: Tag) -> Self {
        EntryQuery {
            tag: Some(tag),
            ..Default::default()
        }
    }

    pub fn in_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(account) = &self.account {
            let hit = entry.account == *account
                || (self.account_prefix
                    && entry
                        .account
                        .strip_prefix(account.as_str())
                        .is_some_and(|rest| rest.starts_with(':')));
            if !hit {
                return false;
            }
        }
        if self.tag.is_some_and(|tag| !entry.has_tag(tag)) {
            return false;
        }
        if self.column.is_some_and(|column| entry.column != column) {
            return false;
        }
        if self.start_date.is_some_and(|d| entry.date < d) {
            return false;
        }
        if self.end_date.is_some_and(|d| entry.date > d) {
            return false;
        }
        if self.min_amount.is_some_and(|m| entry.amount < m) {
            return false;
        }
        if self.max_amount.is_some_and(|m| entry.amount > m) {
            return false;
        }
        if let Some(pattern) = &self.description {
            if !entry
                .description
                .to_lowercase()
                .contains(&pattern.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
}

impl TransactionQuery {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if self.start_date.is_some_and(|d| tx.date() < d) {
            return false;
        }
        if self.end_date.is_some_and(|d| tx.date() > d) {
            return false;
        }
        match &self.description {
            Some(p) => tx.description.to_lowercase().contains(&p.to_lowercase()),
            None => true,
        }
    }
}

/// Tag deltas applied to a stored entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryUpdate {
    pub add_tags: BTreeSet<Tag>,
    pub remove_tags: BTreeSet<Tag>,
}

impl EntryUpdate {
    pub fn remove(tags: &[Tag]) -> Self {
        EntryUpdate {
            add_tags: BTreeSet::new(),
            remove_tags: tags.iter().copied().collect(),
        }
    }

    pub fn add(tags: &[Tag]) -> Self {
        EntryUpdate {
            add_tags: tags.iter().copied().collect(),
            remove_tags: BTreeSet::new(),
        }
    }

    pub fn apply(&self, entry: &mut Entry) {
        for tag in &self.remove_tags {
            entry.tags.remove(tag);
        }
        entry.tags.extend(self.add_tags.iter().copied());
    }
}

/// Storage collaborator for accounts, rules, entries and transactions.
///
/// Single-record primitives only, except [`LedgerStore::commit_pairing`],
/// whose default implementation orders the writes so that a failure can be
/// undone and the pairing retried on a later run.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn save_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn rules(&self) -> Result<Vec<MatchRule>, StoreError>;

    /// Deletes every stored rule and inserts `rules` in order.
    async fn replace_rules(&self, rules: &[MatchRule]) -> Result<(), StoreError>;

    async fn select_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>, StoreError>;

    /// Inserts, or replaces the stored entry with the same uid.
    async fn save_entry(&self, entry: &Entry) -> Result<(), StoreError>;

    async fn update_entry(&self, uid: &str, update: &EntryUpdate) -> Result<(), StoreError>;

    async fn delete_entry(&self, uid: &str) -> Result<(), StoreError>;

    async fn uids(&self) -> Result<HashSet<String>, StoreError>;

    /// Persists the transaction and its ordered entry membership. The entries
    /// themselves must already be stored.
    async fn save_transaction(&self, tx: &Transaction) -> Result<TransactionId, StoreError>;

    async fn select_transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StoreError>;

    async fn account_table(&self) -> Result<AccountTable, StoreError> {
        Ok(AccountTable::new(self.accounts().await?)?)
    }

    /// Saves a freshly paired transaction: new entries first, then the
    /// already stored ones with `#unpaired` removed, then the transaction
    /// itself. A rollback deletes only the entries this call inserted.
    async fn commit_pairing(&self, tx: &Transaction) -> Result<Transaction, StoreError> {
        let stored = self.uids().await?;
        let mut tx = tx.clone();
        let was_unpaired: HashSet<String> = tx
            .entries()
            .iter()
            .filter(|e| e.is_unpaired())
            .map(|e| e.uid.clone())
            .collect();
        tx.clear_entry_tag(Tag::Unpaired);

        let mut inserted = Vec::new();
        for entry in tx.entries().iter().filter(|e| !stored.contains(&e.uid)) {
            if let Err(err) = self.save_entry(entry).await {
                undo_pairing(self, &inserted, &[]).await;
                return Err(err);
            }
            inserted.push(entry.uid.clone());
        }

        let mut stripped = Vec::new();
        for entry in tx.entries().iter().filter(|e| stored.contains(&e.uid)) {
            if let Err(err) = self.save_entry(entry).await {
                undo_pairing(self, &inserted, &stripped).await;
                return Err(err);
            }
            if was_unpaired.contains(&entry.uid) {
                stripped.push(entry.uid.clone());
            }
        }

        match self.save_transaction(&tx).await {
            Ok(id) => {
                tx.assign_id(id);
                Ok(tx)
            }
            Err(err) => {
                undo_pairing(self, &inserted, &stripped).await;
                Err(err)
            }
        }
    }
}

async fn undo_pairing<S: LedgerStore + ?Sized>(store: &S, inserted: &[String], stripped: &[String]) {
    let retag = EntryUpdate::add(&[Tag::Unpaired]);
    for uid in stripped {
        if let Err(err) = store.update_entry(uid, &retag).await {
            tracing::warn!(uid = %uid, error = %err, "failed to restore #unpaired during rollback");
        }
    }
    for uid in inserted {
        if let Err(err) = store.delete_entry(uid).await {
            tracing::warn!(uid = %uid, error = %err, "failed to remove inserted entry during rollback");
        }
    }
}
