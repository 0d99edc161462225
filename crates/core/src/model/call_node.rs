use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};
use stackscope_protocol::{CategoryIndex, FrameTable, FuncIndex, FuncTable, StackTable};

use crate::graph::memo::Inputs;

/// Index of a node in a [`CallNodeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallNodeIndex(u32);

impl CallNodeIndex {
    /// Wrap a row index of the table.
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// The row this index refers to.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Inputs for CallNodeIndex {
    #[inline]
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
}

/// The call-node tree: one node per distinct root-to-node function path.
///
/// A parent always has a lower index than its children, so iterating in
/// index order visits every parent before its descendants.
#[derive(Debug, Clone, Default)]
pub struct CallNodeTable {
    func: Vec<FuncIndex>,
    category: Vec<CategoryIndex>,
    depth: Vec<u32>,
    parent: Vec<Option<CallNodeIndex>>,
    children: Vec<Vec<CallNodeIndex>>,
    roots: Vec<CallNodeIndex>,
    by_parent_and_func: HashMap<(Option<CallNodeIndex>, FuncIndex), CallNodeIndex>,
}

impl CallNodeTable {
    /// Number of call nodes.
    pub fn len(&self) -> usize {
        self.func.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_empty()
    }

    /// The function this node calls.
    pub fn func(&self, node: CallNodeIndex) -> FuncIndex {
        self.func[node.index()]
    }

    /// Category of the first frame that created this node.
    pub fn category(&self, node: CallNodeIndex) -> CategoryIndex {
        self.category[node.index()]
    }

    /// Distance from the root; roots have depth 0.
    pub fn depth(&self, node: CallNodeIndex) -> u32 {
        self.depth[node.index()]
    }

    /// `None` for a root.
    pub fn parent(&self, node: CallNodeIndex) -> Option<CallNodeIndex> {
        self.parent[node.index()]
    }

    /// Children in index order.
    pub fn children(&self, node: CallNodeIndex) -> &[CallNodeIndex] {
        &self.children[node.index()]
    }

    /// Nodes without a parent, in index order.
    pub fn roots(&self) -> &[CallNodeIndex] {
        &self.roots
    }

    /// The child of `parent` (or the root, for `None`) calling `func`.
    pub fn child(&self, parent: Option<CallNodeIndex>, func: FuncIndex) -> Option<CallNodeIndex> {
        self.by_parent_and_func.get(&(parent, func)).copied()
    }

    /// Every node in index order, parents before children.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = CallNodeIndex> + '_ {
        (0..self.len()).map(CallNodeIndex::new)
    }

    /// Walk from `node` up to its root, `node` first.
    pub fn ancestors(&self, node: CallNodeIndex) -> impl Iterator<Item = CallNodeIndex> + '_ {
        std::iter::successors(Some(node), |&n| self.parent(n))
    }

    /// Whether `node` is `ancestor` or lies in its subtree.
    pub fn is_descendant_or_self(&self, node: CallNodeIndex, ancestor: CallNodeIndex) -> bool {
        let target_depth = self.depth(ancestor);
        self.ancestors(node)
            .find(|&n| self.depth(n) == target_depth)
            .is_some_and(|n| n == ancestor)
    }

    /// The existing node for `(parent, func)`, or a new one carrying
    /// `category`. The category of an existing node is never changed.
    fn get_or_insert(
        &mut self,
        parent: Option<CallNodeIndex>,
        func: FuncIndex,
        category: CategoryIndex,
    ) -> CallNodeIndex {
        if let Some(&existing) = self.by_parent_and_func.get(&(parent, func)) {
            return existing;
        }
        let node = CallNodeIndex::new(self.func.len());
        let depth = match parent {
            Some(p) => self.depth(p) + 1,
            None => 0,
        };
        self.func.push(func);
        self.category.push(category);
        self.depth.push(depth);
        self.parent.push(parent);
        self.children.push(Vec::new());
        match parent {
            Some(p) => self.children[p.index()].push(node),
            None => self.roots.push(node),
        }
        self.by_parent_and_func.insert((parent, func), node);
        node
    }
}

/// A call-node table together with the mapping from raw stacks to nodes.
#[derive(Debug, Clone, Default)]
pub struct CallNodeInfo {
    table: CallNodeTable,
    stack_to_call_node: Vec<Option<CallNodeIndex>>,
    inverted: bool,
}

impl CallNodeInfo {
    pub fn table(&self) -> &CallNodeTable {
        &self.table
    }

    /// The node a raw stack collapses into. In an inverted tree this is the
    /// node that receives the stack's self weight.
    pub fn call_node_for_stack(&self, stack: usize) -> Option<CallNodeIndex> {
        self.stack_to_call_node.get(stack).copied().flatten()
    }

    /// The node of every raw stack, indexed by stack.
    pub fn stack_to_call_node(&self) -> &[Option<CallNodeIndex>] {
        &self.stack_to_call_node
    }

    /// Whether the table is rooted at leaf functions.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }
}

/// Collapse raw stacks into the call-node tree.
///
/// Stacks are visited in table order, so a stack's prefix is always mapped
/// before the stack itself. When stacks sharing a `(parent, func)` key
/// disagree on category, the first one seen wins.
pub fn compute_call_node_info(
    stack_table: &StackTable,
    frame_table: &FrameTable,
    func_table: &FuncTable,
    default_category: CategoryIndex,
) -> CallNodeInfo {
    let mut table = CallNodeTable::default();
    let mut stack_to_call_node = Vec::with_capacity(stack_table.len());

    for (&frame, &prefix) in stack_table.frame.iter().zip(&stack_table.prefix) {
        let parent = match prefix {
            Some(prefix) => match stack_to_call_node.get(prefix).copied().flatten() {
                Some(parent) => Some(parent),
                None => {
                    stack_to_call_node.push(None);
                    continue;
                }
            },
            None => None,
        };
        let Some(&func) = frame_table.func.get(frame) else {
            stack_to_call_node.push(None);
            continue;
        };
        if func >= func_table.len() {
            stack_to_call_node.push(None);
            continue;
        }
        let category = frame_table
            .category
            .get(frame)
            .copied()
            .flatten()
            .unwrap_or(default_category);
        stack_to_call_node.push(Some(table.get_or_insert(parent, func, category)));
    }

    debug!(
        "collapsed {} stacks into {} call nodes",
        stack_table.len(),
        table.len()
    );

    CallNodeInfo {
        table,
        stack_to_call_node,
        inverted: false,
    }
}

/// Re-root the tree at its leaves: every call node's function path is read
/// from the node up to its root and inserted into a fresh table with the
/// same keying rules. Each stack maps to the node at the end of its reversed
/// path, which is where its self weight lands.
pub fn invert_call_node_info(info: &CallNodeInfo) -> CallNodeInfo {
    let source = &info.table;
    let mut table = CallNodeTable::default();
    let mut inverted_end = Vec::with_capacity(source.len());

    for node in source.iter() {
        let mut parent = None;
        for ancestor in source.ancestors(node) {
            let inserted =
                table.get_or_insert(parent, source.func(ancestor), source.category(ancestor));
            parent = Some(inserted);
        }
        inverted_end.push(parent);
    }

    let stack_to_call_node = info
        .stack_to_call_node
        .iter()
        .map(|node| node.and_then(|n| inverted_end[n.index()]))
        .collect();

    debug!(
        "inverted {} call nodes into {} call nodes",
        source.len(),
        table.len()
    );

    CallNodeInfo {
        table,
        stack_to_call_node,
        inverted: true,
    }
}
