use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use stackscope_protocol::SamplesTable;

use crate::model::{CallNodeIndex, CallNodeInfo, CallNodeTable};

/// How a sample relates to the selected call node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectedState {
    Selected,
    UnselectedBefore,
    UnselectedAfter,
    FilteredOutByTab,
}

/// Pre-order position of every call node, children visited in index order.
///
/// A node's subtree occupies the ranks `[rank, subtree_end)`.
#[derive(Debug, Clone, Default)]
pub struct TreeOrder {
    rank: Vec<u32>,
    subtree_end: Vec<u32>,
}

impl TreeOrder {
    /// Walk `table` once and record every node's position.
    pub fn new(table: &CallNodeTable) -> Self {
        let mut rank = vec![0; table.len()];
        let mut subtree_end = vec![0; table.len()];
        let mut next = 0u32;

        // Iterative pre-order walk.
        enum Visit {
            Enter(CallNodeIndex),
            Exit(CallNodeIndex),
        }
        let mut pending: Vec<Visit> = table.roots().iter().rev().map(|&n| Visit::Enter(n)).collect();
        while let Some(visit) = pending.pop() {
            match visit {
                Visit::Enter(node) => {
                    rank[node.index()] = next;
                    next += 1;
                    pending.push(Visit::Exit(node));
                    pending.extend(table.children(node).iter().rev().map(|&c| Visit::Enter(c)));
                }
                Visit::Exit(node) => subtree_end[node.index()] = next,
            }
        }

        Self { rank, subtree_end }
    }

    /// Pre-order position of `node`.
    pub fn rank(&self, node: CallNodeIndex) -> u32 {
        self.rank[node.index()]
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    pub fn contains(&self, ancestor: CallNodeIndex, node: CallNodeIndex) -> bool {
        let rank = self.rank(node);
        rank >= self.rank(ancestor) && rank < self.subtree_end[ancestor.index()]
    }

    /// Compare two optional call nodes; nodes without a call node sort last.
    pub fn compare(&self, a: Option<CallNodeIndex>, b: Option<CallNodeIndex>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => self.rank(a).cmp(&self.rank(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// The call node each sample collapses into.
pub fn sample_call_nodes(samples: &SamplesTable, info: &CallNodeInfo) -> Vec<Option<CallNodeIndex>> {
    samples
        .stack
        .iter()
        .map(|stack| stack.and_then(|s| info.call_node_for_stack(s)))
        .collect()
}

/// Classify every sample of the filtered thread against the selection.
///
/// A sample the tab-filtered thread dropped (no stack at that index) is
/// `FilteredOutByTab`. Without a selection every other sample gets the same
/// `UnselectedBefore` state.
pub fn classify_samples(
    sample_call_nodes: &[Option<CallNodeIndex>],
    tab_filtered: &SamplesTable,
    order: &TreeOrder,
    selected: Option<CallNodeIndex>,
) -> Vec<SelectedState> {
    let states: Vec<SelectedState> = sample_call_nodes
        .iter()
        .enumerate()
        .map(|(sample, &node)| {
            if tab_filtered.stack.get(sample).copied().flatten().is_none() {
                return SelectedState::FilteredOutByTab;
            }
            let Some(selected) = selected else {
                return SelectedState::UnselectedBefore;
            };
            match node {
                Some(node) if order.contains(selected, node) => SelectedState::Selected,
                Some(node) if order.rank(node) < order.rank(selected) => {
                    SelectedState::UnselectedBefore
                }
                _ => SelectedState::UnselectedAfter,
            }
        })
        .collect();
    debug!("classified {} samples against {:?}", states.len(), selected);
    states
}

/// Orders sample indexes by where their call nodes appear in the tree.
#[derive(Debug, Clone)]
pub struct SampleTreeOrder {
    sample_call_nodes: Arc<[Option<CallNodeIndex>]>,
    order: Arc<TreeOrder>,
}

impl SampleTreeOrder {
    pub fn new(sample_call_nodes: Arc<[Option<CallNodeIndex>]>, order: Arc<TreeOrder>) -> Self {
        Self {
            sample_call_nodes,
            order,
        }
    }

    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        let node = |sample: usize| self.sample_call_nodes.get(sample).copied().flatten();
        self.order.compare(node(a), node(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::call_node::tests::{abc_thread, info_for};

    fn abc_states(selected: Option<usize>) -> Vec<SelectedState> {
        let thread = abc_thread();
        let info = info_for(&thread);
        let nodes = sample_call_nodes(&thread.samples, &info);
        let order = TreeOrder::new(info.table());
        classify_samples(
            &nodes,
            &thread.samples,
            &order,
            selected.map(CallNodeIndex::new),
        )
    }

    #[test]
    fn selecting_a_b_marks_its_samples() {
        assert_eq!(
            abc_states(Some(1)),
            vec![
                SelectedState::Selected,
                SelectedState::Selected,
                SelectedState::UnselectedAfter,
            ]
        );
    }

    #[test]
    fn selecting_a_c_puts_a_b_before() {
        assert_eq!(
            abc_states(Some(2)),
            vec![
                SelectedState::UnselectedBefore,
                SelectedState::UnselectedBefore,
                SelectedState::Selected,
            ]
        );
    }

    #[test]
    fn selecting_root_selects_descendants() {
        assert!(abc_states(Some(0)).iter().all(|&s| s == SelectedState::Selected));
    }

    #[test]
    fn no_selection_is_uniform() {
        assert!(
            abc_states(None)
                .iter()
                .all(|&s| s == SelectedState::UnselectedBefore)
        );
    }

    #[test]
    fn tab_filtered_samples_are_marked() {
        let thread = abc_thread();
        let info = info_for(&thread);
        let nodes = sample_call_nodes(&thread.samples, &info);
        let order = TreeOrder::new(info.table());
        let mut tab = (*thread.samples).clone();
        tab.stack[1] = None;
        tab.stack.truncate(2);

        let states = classify_samples(&nodes, &tab, &order, Some(CallNodeIndex::new(1)));
        assert_eq!(
            states,
            vec![
                SelectedState::Selected,
                SelectedState::FilteredOutByTab,
                SelectedState::FilteredOutByTab,
            ]
        );
    }

    #[test]
    fn tree_order_is_preorder() {
        let info = info_for(&abc_thread());
        let order = TreeOrder::new(info.table());
        let a = CallNodeIndex::new(0);
        let b = CallNodeIndex::new(1);
        let c = CallNodeIndex::new(2);
        assert_eq!((order.rank(a), order.rank(b), order.rank(c)), (0, 1, 2));
        assert!(order.contains(a, c));
        assert!(!order.contains(b, c));
    }

    #[test]
    fn sample_comparator_sorts_missing_call_nodes_last() {
        let thread = abc_thread();
        let info = info_for(&thread);
        let mut nodes = sample_call_nodes(&thread.samples, &info);
        nodes.push(None);
        let comparator = SampleTreeOrder::new(nodes.into(), Arc::new(TreeOrder::new(info.table())));

        let mut samples = vec![3, 2, 0, 1];
        samples.sort_by(|&a, &b| comparator.compare(a, b));
        assert_eq!(samples, vec![0, 1, 2, 3]);
    }
}
