//! Branch-and-bound search for a subset of integer amounts with an exact sum.
//!
//! Each item is either included or skipped, in input order. Nodes are
//! expanded best-first according to a [`SearchOrder`]; the number of
//! expansions is capped at `budget_factor * items.len()`, after which the
//! search gives up rather than going exhaustive.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub const DEFAULT_BUDGET_FACTOR: usize = 100;

/// Ranks nodes for expansion. Lower ranks are expanded first.
pub trait SearchOrder {
    fn rank(&self, decided: usize, skipped: usize) -> f64;
}

/// Prefers deep nodes with few skipped items, which favours contiguous
/// runs of included items from the front of the list.
#[derive(Debug, Clone, Copy, Default)]
pub struct FewestSkipsDeepest;

impl SearchOrder for FewestSkipsDeepest {
    fn rank(&self, decided: usize, skipped: usize) -> f64 {
        skipped as f64 / (10_000.0 * decided as f64 + 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    decided: usize,
    members: Vec<u64>,
    sum: i64,
    /// Sum of the positive items not yet decided.
    positive_rest: i64,
    /// Sum of the negative items not yet decided.
    negative_rest: i64,
    skipped: usize,
}

impl Node {
    fn root(items: &[i64]) -> Self {
        Node {
            decided: 0,
            members: vec![0; items.len().div_ceil(64)],
            sum: 0,
            positive_rest: items.iter().filter(|&&x| x > 0).sum(),
            negative_rest: items.iter().filter(|&&x| x < 0).sum(),
            skipped: 0,
        }
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.members
            .get(idx / 64)
            .is_some_and(|word| word & (1 << (idx % 64)) != 0)
    }

    /// Indices of the included items, ascending.
    pub fn members(&self) -> Vec<usize> {
        (0..self.decided).filter(|&i| self.contains(i)).collect()
    }

    pub fn is_solution(&self, target: i64) -> bool {
        self.sum == target
    }

    /// Whether `target` is still reachable from this node.
    pub fn is_viable(&self, target: i64) -> bool {
        self.sum + self.negative_rest <= target && target <= self.sum + self.positive_rest
    }

    /// Decides the next item both ways: `(skip, include)`. `None` once every
    /// item is decided.
    fn branch(&self, items: &[i64]) -> Option<(Node, Node)> {
        let item = *items.get(self.decided)?;
        let mut skip = self.clone();
        skip.decided += 1;
        if item > 0 {
            skip.positive_rest -= item;
        } else {
            skip.negative_rest -= item;
        }

        let mut include = skip.clone();
        include.sum += item;
        include.members[self.decided / 64] |= 1 << (self.decided % 64);

        skip.skipped += 1;
        Some((skip, include))
    }
}

struct Queued {
    rank: f64,
    seq: u64,
    node: Node,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest: invert so the lowest rank, then the oldest
// node, comes out first.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .total_cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
pub struct SubsetSearch<O = FewestSkipsDeepest> {
    order: O,
    budget_factor: usize,
}

impl Default for SubsetSearch<FewestSkipsDeepest> {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsetSearch<FewestSkipsDeepest> {
    pub fn new() -> Self {
        SubsetSearch {
            order: FewestSkipsDeepest,
            budget_factor: DEFAULT_BUDGET_FACTOR,
        }
    }
}

impl<O: SearchOrder> SubsetSearch<O> {
    pub fn with_order<P: SearchOrder>(self, order: P) -> SubsetSearch<P> {
        SubsetSearch {
            order,
            budget_factor: self.budget_factor,
        }
    }

    pub fn with_budget_factor(mut self, factor: usize) -> Self {
        self.budget_factor = factor;
        self
    }

    /// Indices of a subset of `items` summing exactly to `target`, or `None`
    /// if none was found within the expansion budget.
    pub fn find(&self, items: &[i64], target: i64) -> Option<Vec<usize>> {
        let root = Node::root(items);
        if root.is_solution(target) {
            return Some(Vec::new());
        }
        if !root.is_viable(target) {
            tracing::debug!(target, items = items.len(), "target out of reach");
            return None;
        }

        let budget = self.budget_factor.saturating_mul(items.len());
        let mut seq = 0u64;
        let mut queue = BinaryHeap::new();
        queue.push(self.queued(root, &mut seq));

        let mut expansions = 0usize;
        while expansions < budget {
            let Some(Queued { node, .. }) = queue.pop() else {
                break;
            };
            let Some((skip, include)) = node.branch(items) else {
                continue;
            };
            for child in [skip, include] {
                if child.is_solution(target) {
                    tracing::debug!(expansions, target, "subset found");
                    return Some(child.members());
                }
                if child.is_viable(target) {
                    queue.push(self.queued(child, &mut seq));
                }
            }
            expansions += 1;
        }

        tracing::debug!(expansions, budget, target, "no subset found");
        None
    }

    fn queued(&self, node: Node, seq: &mut u64) -> Queued {
        *seq += 1;
        Queued {
            rank: self.order.rank(node.decided, node.skipped),
            seq: *seq,
            node,
        }
    }
}

/// [`SubsetSearch::find`] with the default order and budget.
pub fn find_subset(items: &[i64], target: i64) -> Option<Vec<usize>> {
    SubsetSearch::new().find(items, target)
}
