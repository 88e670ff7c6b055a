use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Complete the entry with a synthetic opposite entry in `acct`.
    Match,
    /// Hold the entry for amount-keyed pairing with its other half.
    Transfer,
    /// Leave for interactive completion.
    Fill,
    /// Rewrite descriptions only.
    Substitute,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Match => "match",
            Action::Transfer => "transfer",
            Action::Fill => "fill",
            Action::Substitute => "substitute",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m" | "match" => Ok(Action::Match),
            "t" | "transfer" | "xfer" => Ok(Action::Transfer),
            "f" | "fill" => Ok(Action::Fill),
            "s" | "sub" | "substitute" => Ok(Action::Substitute),
            other => Err(LedgerError::UnknownAction(other.to_string())),
        }
    }
}

/// A description pattern with its rewrite template and target account.
/// Uncompiled; see the import crate for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub action: Action,
    pub expr: String,
    #[serde(default)]
    pub repl: String,
    #[serde(default)]
    pub acct: String,
}

impl MatchRule {
    pub fn new(action: Action, expr: &str, repl: &str, acct: &str) -> Self {
        MatchRule {
            action,
            expr: expr.to_string(),
            repl: repl.to_string(),
            acct: acct.to_string(),
        }
    }
}
