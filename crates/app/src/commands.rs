use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use dexter_core::{AccountTable, EntryQuery, LedgerStore, Tag};
use dexter_import::{
    commit_report, import_accounts, import_entries, missing_rule_accounts, DateWindow, PairingEngine, PairingSummary,
    RuleSet, UidAssigner,
};
use dexter_reconcile::{apply, ReconcileMode, ReconcileSummary, Reconciler, ReconciliationView, SubsetSearch};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// What every command works against.
pub struct Session<'a> {
    pub store: &'a dyn LedgerStore,
    pub config: &'a Config,
    pub preview: bool,
}

pub async fn load_accounts(session: &Session<'_>, file: &Path) -> Result<usize> {
    let reader = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let accounts = import_accounts(reader).with_context(|| format!("reading accounts from {}", file.display()))?;
    AccountTable::new(accounts.clone())?;

    if session.preview {
        for account in &accounts {
            println!("{} ({})", account.name, account.category);
        }
    } else {
        for account in &accounts {
            session.store.save_account(account).await?;
        }
    }
    println!("{} accounts", accounts.len());
    Ok(accounts.len())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportTotals {
    pub new: usize,
    pub duplicates: usize,
    pub errors: usize,
}

pub struct ImportArgs {
    pub files: Vec<PathBuf>,
    pub account: Option<String>,
    pub profile: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Full name, abbrev or trailing path first, then a unique name fragment.
fn resolve_account(table: &AccountTable, name: &str) -> Result<String> {
    if table.is_empty() {
        return Ok(name.to_string());
    }
    if let Some(full) = table.full_name(name) {
        return Ok(full.to_string());
    }
    match table.find(name).as_slice() {
        [account] => Ok(account.name.clone()),
        [] => bail!("unknown account '{name}'"),
        many => {
            let names: Vec<&str> = many.iter().map(|a| a.name.as_str()).collect();
            bail!("account '{name}' is ambiguous: {}", names.join(", "))
        }
    }
}

pub async fn import(session: &Session<'_>, args: ImportArgs) -> Result<ImportTotals> {
    let table = session.store.account_table().await?;
    let window = DateWindow {
        start: args.start_date.or(session.config.database.start_date),
        end: args.end_date,
    };
    let mut assigner = UidAssigner::new(session.store.uids().await?);
    let mut totals = ImportTotals::default();

    for file in &args.files {
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let account = resolve_account(&table, args.account.as_deref().unwrap_or(&stem))?;
        let profile_name = args
            .profile
            .clone()
            .unwrap_or_else(|| account.rsplit(':').next().unwrap_or(&account).to_string());
        let Some(profile) = session.config.profile(&profile_name) else {
            bail!("no [csv.{profile_name}] profile in the config for {}", file.display());
        };

        let reader = File::open(file).with_context(|| format!("opening {}", file.display()))?;
        let entries = import_entries(reader, profile, &account, window)
            .with_context(|| format!("importing {}", file.display()))?;
        let batch = assigner.assign(entries);

        if !session.preview {
            for entry in &batch.entries {
                session.store.save_entry(entry).await?;
            }
        }
        for err in &batch.errors {
            eprintln!("{}: {err}", file.display());
        }
        println!(
            "{}: {} new, {} duplicates, {} errors",
            file.display(),
            batch.entries.len(),
            batch.duplicates.len(),
            batch.errors.len()
        );
        totals.new += batch.entries.len();
        totals.duplicates += batch.duplicates.len();
        totals.errors += batch.errors.len();
    }
    tracing::info!(new = totals.new, duplicates = totals.duplicates, errors = totals.errors, "import finished");
    Ok(totals)
}

pub async fn load_rules(session: &Session<'_>, file: &Path) -> Result<usize> {
    let rules = if file.extension().is_some_and(|ext| ext == "toml") {
        let content = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        RuleSet::parse_toml(&content)?
    } else {
        RuleSet::parse_csv(File::open(file).with_context(|| format!("opening {}", file.display()))?)?
    };
    let compiled = RuleSet::new(rules.clone()).with_context(|| format!("invalid rule in {}", file.display()))?;

    let table = session.store.account_table().await?;
    for acct in missing_rule_accounts(&compiled, &table) {
        tracing::warn!("rule account '{acct}' is not in the account table");
    }

    if !session.preview {
        session.store.replace_rules(&rules).await?;
    }
    println!("{} rules", rules.len());
    Ok(rules.len())
}

pub async fn pair(session: &Session<'_>) -> Result<PairingSummary> {
    let rules = RuleSet::new(session.store.rules().await?).context("stored rules are invalid")?;
    let table = session.store.account_table().await?;
    let unpaired = session.store.select_entries(&EntryQuery::tagged(Tag::Unpaired)).await?;

    let report = PairingEngine::new(&rules, &table).pair(unpaired);
    let summary = report.summary();

    for tx in &report.matched {
        println!("{tx}");
    }
    for item in &report.unmatched {
        println!("unmatched ({}): {}", item.reason, item.entry);
    }
    for entry in &report.deferred_fill {
        println!("fill: {entry} -> {}", rules.suggest(&entry.description));
    }
    println!("{summary}");

    if !session.preview {
        let committed = commit_report(session.store, &report).await;
        println!("{} saved, {} failed", committed.saved.len(), committed.failed);
    }
    Ok(summary)
}

fn print_view(view: &ReconciliationView) {
    println!("{}", view.instrument);
    println!("  payment  {}  {:>12}  {}", view.payment.date, view.payment.amount.to_string(), view.payment.description);
    let selected = view.selected.clone().unwrap_or_default();
    for (idx, item) in view.items.iter().enumerate() {
        let mark = if selected.contains(&idx) { "*" } else { " " };
        println!("  {mark} {}  {:>12}  {}", item.date, item.value().to_string(), item.description);
    }
    match &view.selected {
        Some(_) => println!("  selected total {}", view.selected_total()),
        None => println!("  no subset matches the payment"),
    }
}

pub async fn reconcile(session: &Session<'_>, card: Option<&str>, mode: ReconcileMode) -> Result<ReconcileSummary> {
    let search = SubsetSearch::new().with_budget_factor(session.config.reconcile.expansion_factor);
    let reconciler = Reconciler::new(search);
    let table = session.store.account_table().await?;
    let card = card.map(|c| resolve_account(&table, c)).transpose()?;
    let views = reconciler.reconcile(session.store, card.as_deref()).await?;

    let mode = if session.preview { ReconcileMode::Csv } else { mode };
    let summary = match mode {
        ReconcileMode::Csv => {
            for view in views.values() {
                println!("{}", view.instrument);
                for line in view.csv_lines() {
                    println!("{line}");
                }
            }
            ReconcileSummary::default()
        }
        ReconcileMode::Auto => reconciler.auto_apply(session.store, &views).await?,
        ReconcileMode::Interactive => {
            let theme = ColorfulTheme::default();
            let mut summary = ReconcileSummary::default();
            for view in views.values() {
                print_view(view);
                if view.selected.is_none() {
                    summary.skipped += 1;
                    continue;
                }
                let accept = Confirm::with_theme(&theme)
                    .with_prompt(format!("Reconcile {}?", view.instrument))
                    .default(view.is_contiguous_prefix())
                    .interact()?;
                if accept {
                    summary.cleared += apply(session.store, view).await?;
                    summary.instruments += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            summary
        }
    };
    println!("{summary}");
    Ok(summary)
}
