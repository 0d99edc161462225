use log::{debug, warn};
use serde::{Deserialize, Serialize};
use stackscope_protocol::SamplesTable;

use crate::model::{CallNodeIndex, CallNodeTable};

/// A `[start, end)` interval during which `call_node` was on the stack at
/// this box's depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackTimingBox {
    pub start: f64,
    pub end: f64,
    pub call_node: CallNodeIndex,
}

/// Boxes per depth, each depth sorted by start time without overlaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTiming {
    pub depths: Vec<Vec<StackTimingBox>>,
}

impl StackTiming {
    pub fn box_count(&self) -> usize {
        self.depths.iter().map(Vec::len).sum()
    }
}

/// Lay samples out on a timeline, one row per stack depth.
///
/// Consecutive samples that share a call node at some depth extend the same
/// box at that depth. A sample ends where the next one starts; the last
/// sample lasts one `interval`. A sample without a call node closes every
/// open box. A sample timed before its predecessor is skipped, and boxes
/// that would have no width are not emitted.
pub fn compute_stack_timing(
    samples: &SamplesTable,
    sample_call_nodes: &[Option<CallNodeIndex>],
    table: &CallNodeTable,
    max_depth: Option<u32>,
    interval: f64,
) -> StackTiming {
    let Some(max_depth) = max_depth else {
        return StackTiming::default();
    };
    let mut depths: Vec<Vec<StackTimingBox>> = vec![Vec::new(); max_depth as usize + 1];
    // Open boxes, indexed by depth: (call node, start).
    let mut open: Vec<(CallNodeIndex, f64)> = Vec::new();
    let mut path: Vec<CallNodeIndex> = Vec::new();

    let mut close_from = |open: &mut Vec<(CallNodeIndex, f64)>, depth: usize, end: f64| {
        while open.len() > depth {
            if let Some((call_node, start)) = open.pop() {
                if end <= start {
                    continue;
                }
                if depths.len() <= open.len() {
                    depths.resize_with(open.len() + 1, Vec::new);
                }
                depths[open.len()].push(StackTimingBox {
                    start,
                    end,
                    call_node,
                });
            }
        }
    };

    let mut last_time: Option<f64> = None;
    let mut skipped = 0usize;
    for (&node, &time) in sample_call_nodes.iter().zip(&samples.time) {
        if last_time.is_some_and(|last| time < last) {
            skipped += 1;
            continue;
        }
        path.clear();
        if let Some(node) = node {
            path.extend(table.ancestors(node));
            path.reverse();
        }
        let common = open
            .iter()
            .zip(&path)
            .take_while(|((open_node, _), path_node)| open_node == *path_node)
            .count();
        close_from(&mut open, common, time);
        open.extend(path[common..].iter().map(|&n| (n, time)));
        last_time = Some(time);
    }

    if let Some(last) = last_time {
        close_from(&mut open, 0, last + interval);
    }

    if skipped > 0 {
        warn!("stack timing skipped {skipped} samples recorded out of time order");
    }
    let timing = StackTiming { depths };
    debug!(
        "stack timing: {} boxes over {} depths",
        timing.box_count(),
        timing.depths.len()
    );
    timing
}
