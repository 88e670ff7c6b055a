//! In-memory [`LedgerStore`], used by tests and `--preview` runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::account::Account;
use crate::entry::Entry;
use crate::error::StoreError;
use crate::rule::MatchRule;
use crate::store::{EntryQuery, EntryUpdate, LedgerStore, TransactionQuery};
use crate::transaction::{Transaction, TransactionId};

#[derive(Debug, Default)]
struct State {
    accounts: Vec<Account>,
    rules: Vec<MatchRule>,
    entries: Vec<Entry>,
    transactions: BTreeMap<TransactionId, Transaction>,
    next_id: i64,
    failing_uids: HashSet<String>,
    fail_transactions: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.accounts = accounts;
        }
        store
    }

    /// Makes every subsequent `save_entry` for `uid` fail.
    pub fn fail_saves_for(&self, uid: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_uids.insert(uid.to_string());
        }
    }

    /// Makes every subsequent `save_transaction` fail.
    pub fn fail_transaction_saves(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_transactions = true;
        }
    }

    pub fn entry(&self, uid: &str) -> Option<Entry> {
        let state = self.state.lock().ok()?;
        state.entries.iter().find(|e| e.uid == uid).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().map(|s| s.transactions.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.lock()?.accounts.clone())
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match state.accounts.iter_mut().find(|a| a.name == account.name) {
            Some(existing) => *existing = account.clone(),
            None => state.accounts.push(account.clone()),
        }
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<MatchRule>, StoreError> {
        Ok(self.lock()?.rules.clone())
    }

    async fn replace_rules(&self, rules: &[MatchRule]) -> Result<(), StoreError> {
        self.lock()?.rules = rules.to_vec();
        Ok(())
    }

    async fn select_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>, StoreError> {
        let state = self.lock()?;
        let mut found: Vec<Entry> = state
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.date);
        Ok(found)
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.failing_uids.contains(&entry.uid) {
            return Err(StoreError::Backend(format!("injected failure for {}", entry.uid)));
        }
        match state.entries.iter_mut().find(|e| e.uid == entry.uid) {
            Some(existing) => *existing = entry.clone(),
            None => state.entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn update_entry(&self, uid: &str, update: &EntryUpdate) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.uid == uid)
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
        update.apply(entry);
        Ok(())
    }

    async fn delete_entry(&self, uid: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let before = state.entries.len();
        state.entries.retain(|e| e.uid != uid);
        if state.entries.len() == before {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    async fn uids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock()?.entries.iter().map(|e| e.uid.clone()).collect())
    }

    async fn save_transaction(&self, tx: &Transaction) -> Result<TransactionId, StoreError> {
        let mut state = self.lock()?;
        if state.fail_transactions {
            return Err(StoreError::Backend("injected transaction failure".to_string()));
        }
        for entry in tx.entries() {
            if !state.entries.iter().any(|e| e.uid == entry.uid) {
                return Err(StoreError::NotFound(entry.uid.clone()));
            }
        }

        let id = match tx.id {
            Some(id) => id,
            None => {
                state.next_id += 1;
                TransactionId(state.next_id)
            }
        };
        let mut stored = tx.clone();
        stored.assign_id(id);
        for entry in state.entries.iter_mut() {
            if stored.entries().iter().any(|e| e.uid == entry.uid) {
                entry.transaction = Some(id);
            }
        }
        state.transactions.insert(id, stored);
        Ok(id)
    }

    async fn select_transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .transactions
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        for entry in state.entries.iter_mut() {
            if entry.transaction == Some(id) {
                entry.transaction = None;
            }
        }
        Ok(())
    }
}
