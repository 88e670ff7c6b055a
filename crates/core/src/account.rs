use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Equity,
    Income,
    Asset,
    Expense,
    Liability,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Equity => "equity",
            Category::Income => "income",
            Category::Asset => "asset",
            Category::Expense => "expense",
            Category::Liability => "liability",
        }
    }

    /// Category implied by the top-level segment of a hierarchical name.
    pub fn from_name(name: &str) -> Option<Category> {
        name.split(':').next().and_then(|root| root.parse().ok())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "q" | "equity" => Ok(Category::Equity),
            "i" | "income" => Ok(Category::Income),
            "a" | "asset" | "assets" => Ok(Category::Asset),
            "e" | "expense" | "expenses" => Ok(Category::Expense),
            "l" | "liability" | "liabilities" => Ok(Category::Liability),
            other => Err(LedgerError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub category: Category,
    pub abbrev: Option<String>,
    pub comment: Option<String>,
}

impl Account {
    pub fn new(name: &str, category: Category) -> Self {
        Account {
            name: name.to_string(),
            category,
            abbrev: None,
            comment: None,
        }
    }

    pub fn with_abbrev(mut self, abbrev: &str) -> Self {
        self.abbrev = Some(abbrev.to_string());
        self
    }
}

/// Read-only snapshot of the account list, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    accounts: Vec<Account>,
    by_name: HashMap<String, usize>,
}

impl AccountTable {
    pub fn new(accounts: Vec<Account>) -> Result<Self, LedgerError> {
        let mut by_name = HashMap::with_capacity(accounts.len());
        for (idx, account) in accounts.iter().enumerate() {
            if by_name.insert(account.name.clone(), idx).is_some() {
                return Err(LedgerError::DuplicateAccount(account.name.clone()));
            }
        }
        Ok(AccountTable { accounts, by_name })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn get(&self, full_name: &str) -> Option<&Account> {
        self.by_name.get(full_name).map(|&idx| &self.accounts[idx])
    }

    /// Resolve a full name, an abbreviation, or an unambiguous trailing path
    /// such as `groceries` or `food:groceries`.
    pub fn full_name(&self, name: &str) -> Option<&str> {
        if let Some(account) = self.get(name) {
            return Some(&account.name);
        }
        if let Some(account) = self
            .accounts
            .iter()
            .find(|a| a.abbrev.as_deref() == Some(name))
        {
            return Some(&account.name);
        }
        let suffix = format!(":{name}");
        let mut tails = self.accounts.iter().filter(|a| a.name.ends_with(&suffix));
        match (tails.next(), tails.next()) {
            (Some(account), None) => Some(&account.name),
            _ => None,
        }
    }

    pub fn abbrev<'a>(&'a self, full_name: &'a str) -> &'a str {
        self.get(full_name)
            .and_then(|a| a.abbrev.as_deref())
            .unwrap_or(full_name)
    }

    /// Accounts whose name contains `fragment`, case-insensitive.
    pub fn find(&self, fragment: &str) -> Vec<&Account> {
        let needle = fragment.to_lowercase();
        self.accounts
            .iter()
            .filter(|a| a.name.to_lowercase().contains(&needle))
            .collect()
    }
}
