use std::cmp::Ordering;

use log::debug;
use serde::{Deserialize, Serialize};
use stackscope_protocol::FuncTable;

use crate::model::CallNodeIndex;
use crate::views::call_tree::CallTree;

/// One flame graph box, positioned as proportions of the root total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlameGraphBox {
    pub start: f64,
    pub end: f64,
    /// Share of this box's width that is the node's own weight.
    pub self_relative: f64,
    pub call_node: CallNodeIndex,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlameGraphTiming {
    pub depths: Vec<Vec<FlameGraphBox>>,
}

impl FlameGraphTiming {
    pub fn max_depth(&self) -> Option<u32> {
        self.depths.len().checked_sub(1).map(|d| d as u32)
    }
}

/// Lay a (non-inverted) call tree out as a flame graph.
///
/// Siblings are ordered by function name, then by function index, so the
/// layout only depends on the tree's content. Nodes without weight are
/// left out.
pub fn compute_flame_graph_timing(tree: &CallTree, funcs: &FuncTable) -> FlameGraphTiming {
    let total = tree.root_total_weight();
    let mut timing = FlameGraphTiming::default();
    if total == 0.0 {
        return timing;
    }
    let table = tree.call_node_info().table();

    let by_name = |a: &CallNodeIndex, b: &CallNodeIndex| -> Ordering {
        let (fa, fb) = (table.func(*a), table.func(*b));
        let name = |f: usize| funcs.name.get(f).map(|n| n.as_str()).unwrap_or_default();
        name(fa).cmp(name(fb)).then(fa.cmp(&fb))
    };
    let with_weight = |nodes: &[CallNodeIndex]| -> Vec<CallNodeIndex> {
        let mut nodes: Vec<CallNodeIndex> = nodes
            .iter()
            .copied()
            .filter(|&n| tree.summary(n).total_weight != 0.0)
            .collect();
        nodes.sort_by(by_name);
        nodes
    };

    // (node, depth, start proportion)
    let mut pending = Vec::new();
    let push_siblings = |pending: &mut Vec<(CallNodeIndex, usize, f64)>,
                         siblings: Vec<CallNodeIndex>,
                         depth: usize,
                         start: f64| {
        let mut boxes = Vec::with_capacity(siblings.len());
        let mut cursor = start;
        for node in siblings {
            let width = tree.summary(node).total_weight / total;
            boxes.push((node, depth, cursor));
            cursor += width;
        }
        // Reversed so the first sibling is laid out first.
        pending.extend(boxes.into_iter().rev());
    };

    push_siblings(&mut pending, with_weight(tree.roots()), 0, 0.0);
    while let Some((node, depth, start)) = pending.pop() {
        let summary = tree.summary(node);
        let width = summary.total_weight / total;
        if timing.depths.len() <= depth {
            timing.depths.resize_with(depth + 1, Vec::new);
        }
        timing.depths[depth].push(FlameGraphBox {
            start: start.clamp(0.0, 1.0),
            end: (start + width).clamp(0.0, 1.0),
            self_relative: summary.self_weight / summary.total_weight,
            call_node: node,
        });
        push_siblings(&mut pending, with_weight(tree.children(node)), depth + 1, start);
    }

    debug!(
        "flame graph: {} rows, {} boxes",
        timing.depths.len(),
        timing.depths.iter().map(Vec::len).sum::<usize>()
    );
    timing
}
