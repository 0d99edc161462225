use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use stackscope_protocol::{
    JsAllocationsTable, NativeAllocationsTable, SamplesTable, StackIndex, Thread, ValueUnit,
};

use crate::error::{Capability, ViewError};
use crate::model::{CallNodeIndex, CallNodeInfo};
use crate::strategy::SummaryStrategy;
use crate::transforms::allocations;

/// A stream of weighted rows that can be summarized into a call tree.
pub trait WeightedRows {
    fn row_count(&self) -> usize;
    fn stack(&self, row: usize) -> Option<StackIndex>;
    fn weight(&self, row: usize) -> f64;
}

impl WeightedRows for SamplesTable {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn stack(&self, row: usize) -> Option<StackIndex> {
        self.stack[row]
    }

    fn weight(&self, row: usize) -> f64 {
        self.weight_at(row)
    }
}

impl WeightedRows for JsAllocationsTable {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn stack(&self, row: usize) -> Option<StackIndex> {
        self.stack[row]
    }

    fn weight(&self, row: usize) -> f64 {
        self.weight[row]
    }
}

impl WeightedRows for NativeAllocationsTable {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn stack(&self, row: usize) -> Option<StackIndex> {
        self.stack[row]
    }

    fn weight(&self, row: usize) -> f64 {
        self.weight[row]
    }
}

/// Aggregated numbers for one call node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallNodeSummary {
    pub self_count: u32,
    pub self_weight: f64,
    pub total_count: u32,
    pub total_weight: f64,
}

/// Self and total aggregates for every call node of one `CallNodeInfo`.
#[derive(Debug, Clone)]
pub struct CallTree {
    info: Arc<CallNodeInfo>,
    summaries: Vec<CallNodeSummary>,
    /// Children with a nonzero total count, heaviest first.
    children: Vec<Vec<CallNodeIndex>>,
    roots: Vec<CallNodeIndex>,
    root_total_weight: f64,
    strategy: SummaryStrategy,
    interval: f64,
}

/// Aggregate `rows` over `info`.
///
/// Every row whose stack maps to a call node adds its weight to that node's
/// self and total, and to the total of each ancestor. Rows that do not map
/// are skipped.
pub fn compute_call_tree<R: WeightedRows + ?Sized>(
    rows: &R,
    info: Arc<CallNodeInfo>,
    strategy: SummaryStrategy,
    interval: f64,
) -> CallTree {
    let table = info.table();
    let mut summaries = vec![CallNodeSummary::default(); table.len()];

    for row in 0..rows.row_count() {
        let Some(node) = rows.stack(row).and_then(|s| info.call_node_for_stack(s)) else {
            continue;
        };
        let summary = &mut summaries[node.index()];
        summary.self_count += 1;
        summary.self_weight += rows.weight(row);
    }

    // Children have higher indexes than their parents, so a reverse sweep
    // sees each node's final total before adding it to the parent.
    for node in table.iter().rev() {
        let summary = &mut summaries[node.index()];
        summary.total_count += summary.self_count;
        summary.total_weight += summary.self_weight;
        let (count, weight) = (summary.total_count, summary.total_weight);
        if let Some(parent) = table.parent(node) {
            let parent = &mut summaries[parent.index()];
            parent.total_count += count;
            parent.total_weight += weight;
        }
    }

    let by_weight = |nodes: &[CallNodeIndex]| -> Vec<CallNodeIndex> {
        let mut kept: Vec<CallNodeIndex> = nodes
            .iter()
            .copied()
            .filter(|n| summaries[n.index()].total_count > 0)
            .collect();
        kept.sort_by(|a, b| {
            let wa = summaries[a.index()].total_weight.abs();
            let wb = summaries[b.index()].total_weight.abs();
            wb.total_cmp(&wa).then(a.cmp(b))
        });
        kept
    };
    let children: Vec<Vec<CallNodeIndex>> =
        table.iter().map(|n| by_weight(table.children(n))).collect();
    let roots = by_weight(table.roots());
    let root_total_weight = roots.iter().map(|r| summaries[r.index()].total_weight).sum();

    debug!(
        "call tree over {} rows: {} roots, total weight {}",
        rows.row_count(),
        roots.len(),
        root_total_weight
    );

    CallTree {
        info,
        summaries,
        children,
        roots,
        root_total_weight,
        strategy,
        interval,
    }
}

/// Summarize the stream `strategy` selects from `thread`.
///
/// The strategy is expected to have been resolved against the thread's
/// capabilities already; a strategy the thread's [`Capabilities`] descriptor
/// cannot feed is still reported rather than silently replaced.
///
/// [`Capabilities`]: stackscope_protocol::Capabilities
pub fn compute_call_tree_for_strategy(
    thread: &Thread,
    info: Arc<CallNodeInfo>,
    strategy: SummaryStrategy,
    interval: f64,
) -> Result<CallTree, ViewError> {
    let missing = |capability| ViewError::CapabilityMissing {
        transform: strategy.transform_name(),
        capability,
    };
    if let Some(capability) = strategy.missing_capability(&thread.capabilities()) {
        return Err(missing(capability));
    }
    let native = || {
        thread
            .native_allocations
            .as_deref()
            .ok_or_else(|| missing(Capability::NativeAllocations))
    };

    let tree = match strategy {
        SummaryStrategy::Timing => compute_call_tree(&*thread.samples, info, strategy, interval),
        SummaryStrategy::JsAllocations => {
            let table = thread
                .js_allocations
                .as_deref()
                .ok_or_else(|| missing(Capability::JsAllocations))?;
            compute_call_tree(table, info, strategy, interval)
        }
        SummaryStrategy::NativeAllocations => {
            let rows = allocations::to_allocations(native()?);
            compute_call_tree(&rows, info, strategy, interval)
        }
        SummaryStrategy::NativeRetainedAllocations => {
            // The table is already narrowed to the inspected range.
            let rows = allocations::to_retained_allocations(native()?, None)?;
            compute_call_tree(&rows, info, strategy, interval)
        }
        SummaryStrategy::NativeDeallocationsSites => {
            let rows = allocations::to_deallocation_sites(native()?);
            compute_call_tree(&rows, info, strategy, interval)
        }
        SummaryStrategy::NativeDeallocationsMemory => {
            let rows = allocations::to_deallocations_memory(native()?)?;
            compute_call_tree(&rows, info, strategy, interval)
        }
    };
    Ok(tree)
}

impl CallTree {
    /// The call nodes this tree was aggregated over.
    pub fn call_node_info(&self) -> &Arc<CallNodeInfo> {
        &self.info
    }

    /// The strategy whose rows were summarized.
    pub fn strategy(&self) -> SummaryStrategy {
        self.strategy
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn value_unit(&self) -> ValueUnit {
        self.strategy.value_unit()
    }

    /// Self and total aggregates of `node`.
    pub fn summary(&self, node: CallNodeIndex) -> &CallNodeSummary {
        &self.summaries[node.index()]
    }

    /// Roots with weight, heaviest first.
    pub fn roots(&self) -> &[CallNodeIndex] {
        &self.roots
    }

    /// Children of `node` with weight, heaviest first.
    pub fn children(&self, node: CallNodeIndex) -> &[CallNodeIndex] {
        &self.children[node.index()]
    }

    /// Sum of the roots' total weights: the weight of every row that mapped
    /// to a call node.
    pub fn root_total_weight(&self) -> f64 {
        self.root_total_weight
    }

    /// Deepest node with a nonzero total count.
    pub fn max_depth(&self) -> Option<u32> {
        let table = self.info.table();
        table
            .iter()
            .filter(|n| self.summaries[n.index()].total_count > 0)
            .map(|n| table.depth(n))
            .max()
    }

    /// A node's total formatted for display. Timing totals are sample
    /// weights scaled by the interval into milliseconds.
    pub fn format_total(&self, node: CallNodeIndex) -> String {
        let total = self.summary(node).total_weight;
        match self.value_unit() {
            ValueUnit::Samples => ValueUnit::Milliseconds.format_value(total * self.interval),
            unit => unit.format_value(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::call_node::tests::{abc_thread, info_for};
    use crate::model::invert_call_node_info;
    use pretty_assertions::assert_eq;

    fn summary(self_count: u32, self_weight: f64, total_count: u32, total_weight: f64) -> CallNodeSummary {
        CallNodeSummary {
            self_count,
            self_weight,
            total_count,
            total_weight,
        }
    }

    #[test]
    fn aggregates_abc_samples() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let tree = compute_call_tree(&*thread.samples, info, SummaryStrategy::Timing, 1.0);

        let (a, b, c) = (CallNodeIndex::new(0), CallNodeIndex::new(1), CallNodeIndex::new(2));
        assert_eq!(*tree.summary(a), summary(0, 0.0, 3, 3.0));
        assert_eq!(*tree.summary(b), summary(2, 2.0, 2, 2.0));
        assert_eq!(*tree.summary(c), summary(1, 1.0, 1, 1.0));
        assert_eq!(tree.roots(), &[a]);
        assert_eq!(tree.children(a), &[b, c]);
        assert_eq!(tree.root_total_weight(), 3.0);
        assert_eq!(tree.max_depth(), Some(1));
        assert_eq!(tree.format_total(a), "3.0ms");
    }

    #[test]
    fn totals_cover_self_and_children() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let tree = compute_call_tree(&*thread.samples, info.clone(), SummaryStrategy::Timing, 1.0);
        for node in info.table().iter() {
            let s = tree.summary(node);
            let children: f64 = info
                .table()
                .children(node)
                .iter()
                .map(|&c| tree.summary(c).total_weight)
                .sum();
            assert!(s.total_weight >= s.self_weight + children);
        }
    }

    #[test]
    fn unmapped_rows_are_ignored() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let mut samples = (*thread.samples).clone();
        samples.push(None, 3.0);
        let tree = compute_call_tree(&samples, info, SummaryStrategy::Timing, 1.0);
        assert_eq!(tree.root_total_weight(), 3.0);
    }

    #[test]
    fn row_order_does_not_matter() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let mut reversed = (*thread.samples).clone();
        reversed.stack.reverse();
        let forward = compute_call_tree(&*thread.samples, info.clone(), SummaryStrategy::Timing, 1.0);
        let backward = compute_call_tree(&reversed, info.clone(), SummaryStrategy::Timing, 1.0);
        for node in info.table().iter() {
            assert_eq!(forward.summary(node), backward.summary(node));
        }
    }

    #[test]
    fn inverted_tree_puts_self_on_original_roots() {
        let thread = abc_thread();
        let inverted = Arc::new(invert_call_node_info(&info_for(&thread)));
        let tree = compute_call_tree(&*thread.samples, inverted.clone(), SummaryStrategy::Timing, 1.0);
        let table = inverted.table();

        let root_funcs: Vec<_> = tree.roots().iter().map(|&r| table.func(r)).collect();
        assert_eq!(root_funcs, vec![1, 2]);
        let b = tree.roots()[0];
        assert_eq!(*tree.summary(b), summary(0, 0.0, 2, 2.0));
        let b_a = tree.children(b)[0];
        assert_eq!(table.func(b_a), 0);
        assert_eq!(*tree.summary(b_a), summary(2, 2.0, 2, 2.0));
        assert_eq!(tree.root_total_weight(), 3.0);
    }

    #[test]
    fn strategy_picks_the_matching_stream() {
        let thread = abc_thread().with_native_allocations(NativeAllocationsTable {
            stack: vec![Some(1), Some(2), Some(1)],
            time: vec![0.0, 1.0, 2.0],
            weight: vec![100.0, 30.0, -100.0],
            memory_address: Some(vec![0x1, 0x2, 0x1]),
        });
        let info = Arc::new(info_for(&thread));
        let a = CallNodeIndex::new(0);
        let total = |strategy| {
            compute_call_tree_for_strategy(&thread, info.clone(), strategy, 1.0)
                .unwrap()
                .summary(a)
                .total_weight
        };
        assert_eq!(total(SummaryStrategy::Timing), 3.0);
        assert_eq!(total(SummaryStrategy::NativeAllocations), 130.0);
        assert_eq!(total(SummaryStrategy::NativeRetainedAllocations), 30.0);
        assert_eq!(total(SummaryStrategy::NativeDeallocationsSites), -100.0);
        assert_eq!(total(SummaryStrategy::NativeDeallocationsMemory), -100.0);
    }

    #[test]
    fn missing_table_is_reported() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let err = compute_call_tree_for_strategy(&thread, info, SummaryStrategy::JsAllocations, 1.0)
            .unwrap_err();
        assert_eq!(
            err,
            ViewError::CapabilityMissing {
                transform: "JS allocation summary",
                capability: Capability::JsAllocations,
            }
        );
    }

    #[test]
    fn deallocated_memory_without_addresses_is_reported() {
        let thread = abc_thread().with_native_allocations(NativeAllocationsTable {
            stack: vec![Some(1), Some(1)],
            time: vec![0.0, 1.0],
            weight: vec![16.0, -16.0],
            memory_address: None,
        });
        let info = Arc::new(info_for(&thread));
        let err = compute_call_tree_for_strategy(
            &thread,
            info.clone(),
            SummaryStrategy::NativeDeallocationsMemory,
            1.0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ViewError::CapabilityMissing {
                transform: "deallocated memory",
                capability: Capability::NativeMemoryAddresses,
            }
        );
        // Sites only need the sign of each row.
        let sites = compute_call_tree_for_strategy(
            &thread,
            info,
            SummaryStrategy::NativeDeallocationsSites,
            1.0,
        )
        .unwrap();
        assert_eq!(sites.root_total_weight(), -16.0);
    }

    #[test]
    fn native_bytes_are_summed() {
        let thread = abc_thread();
        let info = Arc::new(info_for(&thread));
        let table = NativeAllocationsTable {
            stack: vec![Some(1), Some(2), Some(2)],
            time: vec![0.0, 1.0, 2.0],
            weight: vec![1024.0, 512.0, 512.0],
            memory_address: None,
        };
        let tree = compute_call_tree(&table, info, SummaryStrategy::NativeAllocations, 1.0);
        let a = CallNodeIndex::new(0);
        assert_eq!(tree.summary(a).total_weight, 2048.0);
        assert_eq!(tree.format_total(a), "2.0 KiB");
        // Equal weights: ties go to the lower index.
        assert_eq!(
            tree.children(a),
            &[CallNodeIndex::new(1), CallNodeIndex::new(2)]
        );
    }
}
