use dexter_core::{AccountTable, Action, Column, Entry, LedgerStore, Transaction};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::rules::RuleSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmatchedReason {
    /// No match, transfer or fill rule applies.
    NoRule,
    /// A match rule names an account missing from the account table.
    UnknownAccount { rule_account: String },
    /// A transfer entry with no counterpart of the same amount.
    TransferResidue,
    /// The entry could not form a balanced transaction.
    Invalid(String),
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::NoRule => f.write_str("no rule"),
            UnmatchedReason::UnknownAccount { rule_account } => {
                write!(f, "rule references unknown account '{rule_account}'")
            }
            UnmatchedReason::TransferResidue => f.write_str("no transfer counterpart"),
            UnmatchedReason::Invalid(msg) => write!(f, "invalid: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unmatched {
    pub entry: Entry,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, Default)]
pub struct PairingReport {
    /// Rule matches and transfer pairs, in processing order.
    pub matched: Vec<Transaction>,
    pub unmatched: Vec<Unmatched>,
    pub deferred_fill: Vec<Entry>,
    /// How many of `matched` came from transfer buckets.
    pub transferred: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingSummary {
    pub matched: usize,
    pub transferred: usize,
    pub deferred: usize,
    pub unmatched: usize,
    pub residue: usize,
}

impl fmt::Display for PairingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} matched, {} transferred, {} deferred for fill, {} unmatched, {} transfer residue",
            self.matched, self.transferred, self.deferred, self.unmatched, self.residue
        )
    }
}

impl PairingReport {
    pub fn summary(&self) -> PairingSummary {
        let residue = self
            .unmatched
            .iter()
            .filter(|u| u.reason == UnmatchedReason::TransferResidue)
            .count();
        PairingSummary {
            matched: self.matched.len() - self.transferred,
            transferred: self.transferred,
            deferred: self.deferred_fill.len(),
            unmatched: self.unmatched.len() - residue,
            residue,
        }
    }
}

type Bucket = BTreeMap<i64, VecDeque<(usize, Entry)>>;

/// Turns unpaired entries into balanced transactions using a rule table and
/// an account table, both fixed for the run.
pub struct PairingEngine<'a> {
    rules: &'a RuleSet,
    accounts: &'a AccountTable,
}

impl<'a> PairingEngine<'a> {
    pub fn new(rules: &'a RuleSet, accounts: &'a AccountTable) -> Self {
        Self { rules, accounts }
    }

    pub fn pair(&self, entries: Vec<Entry>) -> PairingReport {
        let mut report = PairingReport::default();

        let mut ordered: Vec<(usize, Entry)> = entries.into_iter().enumerate().collect();
        ordered.sort_by_key(|(_, e)| e.date);

        let mut notes: HashMap<usize, String> = HashMap::new();
        let mut credits: Bucket = BTreeMap::new();
        let mut debits: Bucket = BTreeMap::new();

        for (idx, entry) in ordered {
            let desc = entry.description.as_str();

            if let Some(rule) = self.rules.find(desc, &[Action::Match]) {
                let Some(account) = self.accounts.full_name(rule.account()) else {
                    tracing::warn!(
                        account = rule.account(),
                        "rule '{}' references an unknown account; skipping {entry}",
                        rule.rule().expr
                    );
                    report.unmatched.push(Unmatched {
                        reason: UnmatchedReason::UnknownAccount {
                            rule_account: rule.account().to_string(),
                        },
                        entry,
                    });
                    continue;
                };
                let description = rule.apply(desc).unwrap_or_else(|| desc.to_string());
                tracing::debug!("match '{}' -> {account}: {entry}", rule.rule().expr);
                match self.match_entry(&entry, account, &description) {
                    Ok(tx) => report.matched.push(tx),
                    Err(msg) => report.unmatched.push(Unmatched {
                        entry,
                        reason: UnmatchedReason::Invalid(msg),
                    }),
                }
            } else if let Some(rule) = self.rules.find(desc, &[Action::Transfer]) {
                notes.insert(idx, rule.apply(desc).unwrap_or_else(|| desc.to_string()));
                let key = entry.amount.abs().to_cents();
                tracing::debug!(cents = key, column = %entry.column, "transfer bucket: {entry}");
                let bucket = match entry.column {
                    Column::Credit => &mut credits,
                    Column::Debit => &mut debits,
                };
                bucket.entry(key).or_default().push_back((idx, entry));
            } else if self.rules.find(desc, &[Action::Fill]).is_some() {
                report.deferred_fill.push(entry);
            } else {
                report.unmatched.push(Unmatched {
                    entry,
                    reason: UnmatchedReason::NoRule,
                });
            }
        }

        self.combine_transfers(&mut report, credits, debits, &notes);

        tracing::info!("pairing: {}", report.summary());
        report
    }

    fn match_entry(&self, entry: &Entry, account: &str, description: &str) -> Result<Transaction, String> {
        let synthetic = Entry::new(
            entry.date,
            &format!("match {}", entry.description),
            account,
            entry.column.opposite(),
            entry.amount,
        )
        .map_err(|e| e.to_string())?;
        Transaction::new(description, vec![entry.clone(), synthetic]).map_err(|e| e.to_string())
    }

    /// Pops credit and debit entries of equal amount pairwise, oldest insertion
    /// first. Whatever is left over on either side is residue.
    fn combine_transfers(
        &self,
        report: &mut PairingReport,
        mut credits: Bucket,
        mut debits: Bucket,
        notes: &HashMap<usize, String>,
    ) {
        for (key, credit_queue) in credits.iter_mut() {
            let Some(debit_queue) = debits.get_mut(key) else {
                continue;
            };
            while !credit_queue.is_empty() && !debit_queue.is_empty() {
                let (Some((c_idx, credit)), Some((_, debit))) =
                    (credit_queue.pop_front(), debit_queue.pop_front())
                else {
                    break;
                };
                let description = notes
                    .get(&c_idx)
                    .cloned()
                    .unwrap_or_else(|| credit.description.clone());
                match Transaction::new(&description, vec![credit.clone(), debit.clone()]) {
                    Ok(tx) => {
                        tracing::debug!("transfer {}: {} <-> {}", tx.amount(), credit.account, debit.account);
                        report.matched.push(tx);
                        report.transferred += 1;
                    }
                    Err(err) => {
                        for entry in [credit, debit] {
                            report.unmatched.push(Unmatched {
                                entry,
                                reason: UnmatchedReason::Invalid(err.to_string()),
                            });
                        }
                    }
                }
            }
        }

        let leftovers = credits.into_values().chain(debits.into_values()).flatten();
        for (_, entry) in leftovers {
            tracing::debug!("transfer residue: {entry}");
            report.unmatched.push(Unmatched {
                entry,
                reason: UnmatchedReason::TransferResidue,
            });
        }
    }
}

#[derive(Debug, Default)]
pub struct CommitSummary {
    pub saved: Vec<Transaction>,
    pub failed: usize,
}

/// Commits every produced transaction through [`LedgerStore::commit_pairing`].
/// A failed pairing is logged and counted; the rest still commit.
pub async fn commit_report<S: LedgerStore + ?Sized>(store: &S, report: &PairingReport) -> CommitSummary {
    let mut summary = CommitSummary::default();
    for tx in &report.matched {
        match store.commit_pairing(tx).await {
            Ok(saved) => summary.saved.push(saved),
            Err(err) => {
                tracing::warn!(error = %err, "failed to save '{}' ({}); will retry next run", tx.description, tx.originals());
                summary.failed += 1;
            }
        }
    }
    tracing::info!(saved = summary.saved.len(), failed = summary.failed, "pairing committed");
    summary
}

/// Accounts an account table needs so that every match rule resolves.
pub fn missing_rule_accounts<'r>(rules: &'r RuleSet, accounts: &AccountTable) -> Vec<&'r str> {
    rules
        .iter()
        .filter(|r| r.action() == Action::Match)
        .map(|r| r.account())
        .filter(|acct| accounts.full_name(acct).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use dexter_core::{Account, Category, MatchRule, MemoryStore, Money, Tag};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn entry(day: u32, desc: &str, account: &str, column: Column, cents: i64) -> Entry {
        Entry::new(date(day), desc, account, column, Money::from_cents(cents))
            .unwrap()
            .with_tag(Tag::Unpaired)
    }

    fn accounts() -> AccountTable {
        AccountTable::new(vec![
            Account::new("assets:checking", Category::Asset).with_abbrev("checking"),
            Account::new("assets:savings", Category::Asset),
            Account::new("expenses:car", Category::Expense).with_abbrev("car"),
            Account::new("expenses:food:groceries", Category::Expense),
        ])
        .unwrap()
    }

    fn rules() -> RuleSet {
        RuleSet::new(vec![
            MatchRule::new(Action::Match, "CHEVRON", "Chevron", "car"),
            MatchRule::new(Action::Match, "COSTCO", "Costco", "groceries"),
            MatchRule::new(Action::Match, "CINEMA", "Movies", "entertainment"),
            MatchRule::new(Action::Transfer, r"TRANSFER (\w+)", "Transfer {1.title}", ""),
            MatchRule::new(Action::Fill, "^CHECK", "", ""),
        ])
        .unwrap()
    }

    #[test]
    fn match_rule_builds_synthetic_opposite() {
        let (rules, accounts) = (rules(), accounts());
        let engine = PairingEngine::new(&rules, &accounts);
        let original = entry(3, "CHEVRON 123", "assets:checking", Column::Debit, 7500);
        let report = engine.pair(vec![original.clone()]);

        assert_eq!(report.matched.len(), 1);
        let tx = &report.matched[0];
        assert_eq!(tx.description, "Chevron");
        assert_eq!(tx.entries()[0], original);
        let synthetic = &tx.entries()[1];
        assert_eq!(synthetic.account, "expenses:car");
        assert_eq!(synthetic.column, Column::Credit);
        assert_eq!(synthetic.amount, Money::from_cents(7500));
        assert_eq!(synthetic.description, "match CHEVRON 123");
        assert!(synthetic.tags.is_empty());
        assert_ne!(synthetic.uid, original.uid);
    }

    #[test]
    fn leaf_name_resolves_rule_account() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts)
            .pair(vec![entry(3, "COSTCO #12", "assets:checking", Column::Credit, 1999)]);
        assert_eq!(report.matched[0].entries()[1].account, "expenses:food:groceries");
    }

    #[test]
    fn unknown_rule_account_is_unmatched() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts)
            .pair(vec![entry(3, "CINEMA 9", "assets:checking", Column::Credit, 1200)]);
        assert!(report.matched.is_empty());
        assert_eq!(
            report.unmatched[0].reason,
            UnmatchedReason::UnknownAccount {
                rule_account: "entertainment".to_string()
            }
        );
    }

    #[test]
    fn transfer_pair_leaves_no_residue() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts).pair(vec![
            entry(5, "TRANSFER savings", "assets:checking", Column::Credit, 4200),
            entry(6, "TRANSFER checking", "assets:savings", Column::Debit, 4200),
        ]);

        assert_eq!(report.matched.len(), 1);
        assert!(report.unmatched.is_empty());
        let tx = &report.matched[0];
        assert_eq!(tx.entries().len(), 2);
        assert_eq!(tx.entries()[0].column, Column::Credit);
        assert_eq!(tx.description, "Transfer Savings");
        assert_eq!(report.summary().transferred, 1);
        assert_eq!(report.summary().matched, 0);
    }

    #[test]
    fn transfer_buckets_pair_in_insertion_order() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts).pair(vec![
            entry(1, "TRANSFER a", "assets:checking", Column::Credit, 1000),
            entry(2, "TRANSFER b", "assets:checking", Column::Credit, 1000),
            entry(3, "TRANSFER c", "assets:savings", Column::Debit, 1000),
        ]);

        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.matched[0].description, "Transfer A");
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].entry.description, "TRANSFER b");
        assert_eq!(report.unmatched[0].reason, UnmatchedReason::TransferResidue);
    }

    #[test]
    fn fill_and_no_rule_are_surfaced() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts).pair(vec![
            entry(1, "CHECK 161", "assets:checking", Column::Credit, 5000),
            entry(2, "MYSTERY", "assets:checking", Column::Credit, 100),
        ]);
        assert_eq!(report.deferred_fill.len(), 1);
        assert_eq!(report.unmatched[0].reason, UnmatchedReason::NoRule);
        let summary = report.summary();
        assert_eq!((summary.deferred, summary.unmatched), (1, 1));
    }

    #[test]
    fn every_transaction_balances() {
        let (rules, accounts) = (rules(), accounts());
        let report = PairingEngine::new(&rules, &accounts).pair(vec![
            entry(1, "CHEVRON 1", "assets:checking", Column::Debit, 3311),
            entry(2, "COSTCO 2", "assets:checking", Column::Credit, 8999),
            entry(3, "TRANSFER x", "assets:checking", Column::Credit, 25000),
            entry(4, "TRANSFER y", "assets:savings", Column::Debit, 25000),
        ]);
        assert_eq!(report.matched.len(), 3);
        for tx in &report.matched {
            let credits: Money = tx.credits().map(|e| e.amount).sum();
            let debits: Money = tx.debits().map(|e| e.amount).sum();
            assert_eq!(credits, debits);
        }
    }

    #[test]
    fn repairing_is_idempotent() {
        let (rules, accounts) = (rules(), accounts());
        let engine = PairingEngine::new(&rules, &accounts);
        let input = vec![
            entry(9, "MYSTERY", "assets:checking", Column::Credit, 100),
            entry(1, "CHEVRON 1", "assets:checking", Column::Debit, 3311),
            entry(3, "TRANSFER x", "assets:checking", Column::Credit, 500),
        ];
        let first = engine.pair(input.clone());
        let second = engine.pair(input);
        assert_eq!(first.matched, second.matched);
        assert_eq!(first.unmatched, second.unmatched);
        assert_eq!(first.deferred_fill, second.deferred_fill);
    }

    #[test]
    fn missing_accounts_are_listed() {
        let (rules, accounts) = (rules(), accounts());
        assert_eq!(missing_rule_accounts(&rules, &accounts), vec!["entertainment"]);
    }

    #[tokio::test]
    async fn commit_report_saves_and_strips_unpaired() {
        let (rules, accounts) = (rules(), accounts());
        let store = MemoryStore::new();
        let original = entry(3, "CHEVRON 123", "assets:checking", Column::Debit, 7500);
        store.save_entry(&original).await.unwrap();

        let report = PairingEngine::new(&rules, &accounts).pair(vec![original.clone()]);
        let summary = commit_report(&store, &report).await;

        assert_eq!(summary.saved.len(), 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.entry_count(), 2);
        assert!(!store.entry(&original.uid).unwrap().is_unpaired());
    }

    #[tokio::test]
    async fn commit_report_continues_after_failure() {
        let (rules, accounts) = (rules(), accounts());
        let store = MemoryStore::new();
        let bad = entry(1, "CHEVRON 1", "assets:checking", Column::Debit, 100);
        let good = entry(2, "COSTCO 2", "assets:checking", Column::Credit, 200);
        store.save_entry(&bad).await.unwrap();
        store.save_entry(&good).await.unwrap();
        store.fail_saves_for(&bad.uid);

        let report = PairingEngine::new(&rules, &accounts).pair(vec![bad.clone(), good.clone()]);
        let summary = commit_report(&store, &report).await;

        assert_eq!(summary.saved.len(), 1);
        assert_eq!(summary.failed, 1);
        assert!(store.entry(&bad.uid).unwrap().is_unpaired());
        assert!(!store.entry(&good.uid).unwrap().is_unpaired());
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn failed_commit_keeps_untagged_source_entry() {
        let (rules, accounts) = (rules(), accounts());
        let store = MemoryStore::new();
        let source = Entry::new(date(1), "CHEVRON 1", "assets:checking", Column::Debit, Money::from_cents(100)).unwrap();
        store.save_entry(&source).await.unwrap();
        store.fail_transaction_saves();

        let report = PairingEngine::new(&rules, &accounts).pair(vec![source.clone()]);
        let summary = commit_report(&store, &report).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.entry(&source.uid).unwrap(), source);
    }

    #[test]
    fn rule_account_may_be_a_path_suffix() {
        let accounts = accounts();
        let rules = RuleSet::new(vec![MatchRule::new(Action::Match, "COSTCO", "Costco", "food:groceries")]).unwrap();
        let report = PairingEngine::new(&rules, &accounts).pair(vec![entry(
            5,
            "COSTCO 44",
            "assets:checking",
            Column::Credit,
            9000,
        )]);

        assert!(report.unmatched.is_empty());
        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.matched[0].debit(), "expenses:food:groceries");
    }
}
