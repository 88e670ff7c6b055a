use chrono::NaiveDate;
use dexter_core::{Column, Entry, EntryQuery, EntryUpdate, LedgerStore, Money, StoreError, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::subset_sum::{FewestSkipsDeepest, SearchOrder, SubsetSearch};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("no matching subset for {instrument}")]
    NoSelection { instrument: String },
    #[error("unknown reconcile mode '{0}' (expected csv, interactive or auto)")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Print the pending lines per instrument; change nothing.
    Csv,
    /// Ask before applying each instrument.
    #[default]
    Interactive,
    /// Apply contiguous-prefix selections without asking.
    Auto,
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileMode::Csv => "csv",
            ReconcileMode::Interactive => "interactive",
            ReconcileMode::Auto => "auto",
        })
    }
}

impl FromStr for ReconcileMode {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "preview" => Ok(ReconcileMode::Csv),
            "interactive" | "ask" => Ok(ReconcileMode::Interactive),
            "auto" => Ok(ReconcileMode::Auto),
            other => Err(ReconcileError::UnknownMode(other.to_string())),
        }
    }
}

/// Pending entries of one instrument, split into settlements and the items
/// they may settle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingGroup {
    pub payments: Vec<Entry>,
    pub items: Vec<Entry>,
}

/// One instrument ready for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationView {
    pub instrument: String,
    pub payment: Entry,
    /// Returns first, then purchases, each in date order.
    pub items: Vec<Entry>,
    /// Indices into `items`, ascending.
    pub selected: Option<Vec<usize>>,
}

impl ReconciliationView {
    /// Item amounts in cents, negative for returns.
    pub fn signed_cents(&self) -> Vec<i64> {
        self.items
            .iter()
            .map(|e| signed_cents(e, self.payment.column))
            .collect()
    }

    pub fn target(&self) -> i64 {
        self.payment.amount.to_cents()
    }

    pub fn selected_entries(&self) -> Vec<&Entry> {
        self.selected
            .iter()
            .flatten()
            .filter_map(|&i| self.items.get(i))
            .collect()
    }

    pub fn selected_total(&self) -> Money {
        Money::from_cents(
            self.selected
                .iter()
                .flatten()
                .filter_map(|&i| self.items.get(i))
                .map(|e| signed_cents(e, self.payment.column))
                .sum(),
        )
    }

    /// True when the selection is exactly `items[..k]` for some `k`, the one
    /// shape that is safe to apply unreviewed.
    pub fn is_contiguous_prefix(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|sel| sel.iter().enumerate().all(|(pos, &idx)| pos == idx))
    }

    /// `date,description,value` lines: the payment, then each item.
    pub fn csv_lines(&self) -> Vec<String> {
        std::iter::once(&self.payment)
            .chain(self.items.iter())
            .map(|e| format!("{},{},{}", e.date, e.description, e.value().plain()))
            .collect()
    }
}

fn signed_cents(entry: &Entry, settlement: Column) -> i64 {
    let cents = entry.amount.to_cents();
    if entry.column == settlement {
        -cents
    } else {
        cents
    }
}

/// Groups `#pending` entries by account. Entries tagged `#xfer` are payments.
pub fn group_pending(entries: Vec<Entry>) -> BTreeMap<String, PendingGroup> {
    let mut groups: BTreeMap<String, PendingGroup> = BTreeMap::new();
    for entry in entries {
        let group = groups.entry(entry.account.clone()).or_default();
        if entry.has_tag(Tag::Settlement) {
            group.payments.push(entry);
        } else {
            group.items.push(entry);
        }
    }
    groups
}

/// Builds the view for one instrument against its earliest payment. Returns
/// `None` when there is no payment or nothing dated before it.
pub fn build_view<O: SearchOrder>(
    instrument: &str,
    group: &PendingGroup,
    search: &SubsetSearch<O>,
) -> Option<ReconciliationView> {
    let payment = group.payments.iter().min_by_key(|e| e.date)?.clone();
    if group.payments.len() > 1 {
        tracing::info!(
            instrument,
            deferred = group.payments.len() - 1,
            "reconciling the earliest of several payments"
        );
    }

    let cutoff: NaiveDate = payment.date;
    let mut eligible: Vec<&Entry> = group.items.iter().filter(|e| e.date < cutoff).collect();
    if eligible.is_empty() {
        tracing::debug!(instrument, %cutoff, "no pending items before payment");
        return None;
    }
    eligible.sort_by_key(|e| (e.column != payment.column, e.date));
    let items: Vec<Entry> = eligible.into_iter().cloned().collect();

    let mut view = ReconciliationView {
        instrument: instrument.to_string(),
        payment,
        items,
        selected: None,
    };
    view.selected = search.find(&view.signed_cents(), view.target());
    match &view.selected {
        Some(sel) => tracing::debug!(instrument, selected = sel.len(), "subset found"),
        None => tracing::info!(instrument, "no subset of pending items matches {}", view.payment.amount),
    }
    Some(view)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub instruments: usize,
    pub cleared: usize,
    pub skipped: usize,
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instruments reconciled, {} entries cleared, {} skipped",
            self.instruments, self.cleared, self.skipped
        )
    }
}

pub struct Reconciler<O = FewestSkipsDeepest> {
    search: SubsetSearch<O>,
}

impl Default for Reconciler<FewestSkipsDeepest> {
    fn default() -> Self {
        Self::new(SubsetSearch::new())
    }
}

impl<O: SearchOrder> Reconciler<O> {
    pub fn new(search: SubsetSearch<O>) -> Self {
        Self { search }
    }

    /// Pending entries for every instrument, or just `instrument`.
    pub async fn collect<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        instrument: Option<&str>,
    ) -> Result<BTreeMap<String, PendingGroup>, ReconcileError> {
        let mut query = EntryQuery::tagged(Tag::Pending);
        if let Some(name) = instrument {
            query = query.in_account(name);
        }
        Ok(group_pending(store.select_entries(&query).await?))
    }

    pub async fn reconcile<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        instrument: Option<&str>,
    ) -> Result<BTreeMap<String, ReconciliationView>, ReconcileError> {
        let groups = self.collect(store, instrument).await?;
        Ok(self.plan(&groups))
    }

    pub fn plan(&self, groups: &BTreeMap<String, PendingGroup>) -> BTreeMap<String, ReconciliationView> {
        groups
            .iter()
            .filter_map(|(name, group)| build_view(name, group, &self.search).map(|v| (name.clone(), v)))
            .collect()
    }

    /// Applies every view whose selection is a contiguous prefix.
    pub async fn auto_apply<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        views: &BTreeMap<String, ReconciliationView>,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let mut summary = ReconcileSummary::default();
        for view in views.values() {
            if !view.is_contiguous_prefix() {
                tracing::info!(instrument = %view.instrument, "selection needs review; skipping");
                summary.skipped += 1;
                continue;
            }
            summary.cleared += apply(store, view).await?;
            summary.instruments += 1;
        }
        tracing::info!("reconcile: {summary}");
        Ok(summary)
    }
}

/// Clears `#pending` from the selected items, then `#xfer` and `#pending`
/// from the payment. Returns the number of entries updated.
///
/// An interrupted apply leaves the payment pending, so it is offered again
/// on the next run.
pub async fn apply<S: LedgerStore + ?Sized>(store: &S, view: &ReconciliationView) -> Result<usize, ReconcileError> {
    if view.selected.is_none() {
        return Err(ReconcileError::NoSelection {
            instrument: view.instrument.clone(),
        });
    }

    let clear_item = EntryUpdate::remove(&[Tag::Pending]);
    let mut cleared = 0;
    for entry in view.selected_entries() {
        store.update_entry(&entry.uid, &clear_item).await?;
        cleared += 1;
    }
    store
        .update_entry(&view.payment.uid, &EntryUpdate::remove(&[Tag::Settlement, Tag::Pending]))
        .await?;

    tracing::info!(
        instrument = %view.instrument,
        items = cleared,
        "reconciled payment of {}",
        view.payment.amount
    );
    Ok(cleared + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexter_core::MemoryStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn pending(day: u32, desc: &str, column: Column, cents: i64) -> Entry {
        Entry::new(date(day), desc, "liabilities:visa", column, Money::from_cents(cents))
            .unwrap()
            .with_tag(Tag::Pending)
    }

    fn payment(day: u32, cents: i64) -> Entry {
        pending(day, "PAYMENT THANK YOU", Column::Debit, cents).with_tag(Tag::Settlement)
    }

    fn group(entries: Vec<Entry>) -> PendingGroup {
        group_pending(entries).remove("liabilities:visa").unwrap()
    }

    #[test]
    fn settlement_tag_marks_payments() {
        let g = group(vec![
            payment(20, 5000),
            pending(1, "A", Column::Credit, 5000),
        ]);
        assert_eq!(g.payments.len(), 1);
        assert_eq!(g.items.len(), 1);
    }

    #[test]
    fn items_on_or_after_payment_date_are_excluded() {
        let g = group(vec![
            payment(10, 3000),
            pending(9, "A", Column::Credit, 3000),
            pending(10, "B", Column::Credit, 3000),
            pending(11, "C", Column::Credit, 3000),
        ]);
        let view = build_view("liabilities:visa", &g, &SubsetSearch::new()).unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].description, "A");
        assert_eq!(view.selected, Some(vec![0]));
    }

    #[test]
    fn earliest_payment_is_used() {
        let g = group(vec![
            payment(25, 9999),
            payment(15, 2000),
            pending(1, "A", Column::Credit, 2000),
        ]);
        let view = build_view("liabilities:visa", &g, &SubsetSearch::new()).unwrap();
        assert_eq!(view.payment.date, date(15));
    }

    #[test]
    fn returns_lead_and_count_negative() {
        let g = group(vec![
            payment(20, 4000),
            pending(2, "SHOES", Column::Credit, 6000),
            pending(5, "SHOES RETURN", Column::Debit, 2000),
        ]);
        let view = build_view("liabilities:visa", &g, &SubsetSearch::new()).unwrap();
        assert_eq!(view.items[0].description, "SHOES RETURN");
        assert_eq!(view.signed_cents(), vec![-2000, 6000]);
        assert_eq!(view.selected, Some(vec![0, 1]));
        assert_eq!(view.selected_total(), Money::from_cents(4000));
    }

    #[test]
    fn no_payment_means_no_view() {
        let g = PendingGroup {
            payments: vec![],
            items: vec![pending(1, "A", Column::Credit, 100)],
        };
        assert!(build_view("liabilities:visa", &g, &SubsetSearch::new()).is_none());
    }

    #[test]
    fn prefix_detection() {
        let mut view = ReconciliationView {
            instrument: "visa".to_string(),
            payment: payment(20, 100),
            items: vec![],
            selected: Some(vec![0, 1, 2]),
        };
        assert!(view.is_contiguous_prefix());
        view.selected = Some(vec![0, 2]);
        assert!(!view.is_contiguous_prefix());
        view.selected = None;
        assert!(!view.is_contiguous_prefix());
    }

    #[test]
    fn csv_lines_use_signed_values() {
        let g = group(vec![payment(20, 1500), pending(1, "A", Column::Credit, 1500)]);
        let view = build_view("liabilities:visa", &g, &SubsetSearch::new()).unwrap();
        assert_eq!(
            view.csv_lines(),
            vec![
                "2024-06-20,PAYMENT THANK YOU,15.00".to_string(),
                "2024-06-01,A,-15.00".to_string(),
            ]
        );
    }

    #[test]
    fn mode_parses() {
        assert_eq!("auto".parse::<ReconcileMode>().unwrap(), ReconcileMode::Auto);
        assert_eq!("CSV".parse::<ReconcileMode>().unwrap(), ReconcileMode::Csv);
        assert!("manual".parse::<ReconcileMode>().is_err());
    }

    #[tokio::test]
    async fn apply_clears_selected_and_payment() {
        let store = MemoryStore::new();
        let entries = vec![
            payment(20, 3000),
            pending(1, "A", Column::Credit, 3000),
            pending(2, "B", Column::Credit, 700),
        ];
        for e in &entries {
            store.save_entry(e).await.unwrap();
        }

        let reconciler = Reconciler::default();
        let views = reconciler.reconcile(&store, Some("liabilities:visa")).await.unwrap();
        let view = &views["liabilities:visa"];
        assert_eq!(apply(&store, view).await.unwrap(), 2);

        let paid = store.entry(&entries[0].uid).unwrap();
        assert!(paid.tags.is_empty());
        assert!(!store.entry(&entries[1].uid).unwrap().has_tag(Tag::Pending));
        assert!(store.entry(&entries[2].uid).unwrap().has_tag(Tag::Pending));

        let again = reconciler.reconcile(&store, None).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn auto_apply_skips_non_prefix_selections() {
        let store = MemoryStore::new();
        let entries = vec![
            payment(20, 700),
            pending(1, "A", Column::Credit, 3000),
            pending(2, "B", Column::Credit, 700),
        ];
        for e in &entries {
            store.save_entry(e).await.unwrap();
        }

        let reconciler = Reconciler::default();
        let views = reconciler.reconcile(&store, None).await.unwrap();
        assert_eq!(views["liabilities:visa"].selected, Some(vec![1]));

        let summary = reconciler.auto_apply(&store, &views).await.unwrap();
        assert_eq!(summary, ReconcileSummary { instruments: 0, cleared: 0, skipped: 1 });
        assert!(store.entry(&entries[2].uid).unwrap().has_tag(Tag::Pending));
    }

    #[tokio::test]
    async fn apply_without_selection_errors() {
        let store = MemoryStore::new();
        let view = ReconciliationView {
            instrument: "visa".to_string(),
            payment: payment(20, 100),
            items: vec![],
            selected: None,
        };
        assert!(matches!(
            apply(&store, &view).await,
            Err(ReconcileError::NoSelection { .. })
        ));
    }
}
