pub mod reconcile;
pub mod subset_sum;

pub use reconcile::{
    apply, build_view, group_pending, PendingGroup, ReconcileError, ReconcileMode, ReconcileSummary,
    ReconciliationView, Reconciler,
};
pub use subset_sum::{find_subset, FewestSkipsDeepest, Node, SearchOrder, SubsetSearch, DEFAULT_BUDGET_FACTOR};
