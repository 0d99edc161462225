use serde::{Deserialize, Serialize};
use stackscope_protocol::FuncIndex;

use super::call_node::{CallNodeIndex, CallNodeTable};

/// The function identities from a root down to a call node.
///
/// Paths outlive any particular call-node table, which is why selections
/// are stored as paths and resolved against the current table on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallNodePath(Vec<FuncIndex>);

impl CallNodePath {
    pub fn new(funcs: Vec<FuncIndex>) -> Self {
        Self(funcs)
    }

    /// Function indexes, root first.
    pub fn funcs(&self) -> &[FuncIndex] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<FuncIndex>> for CallNodePath {
    fn from(funcs: Vec<FuncIndex>) -> Self {
        Self(funcs)
    }
}

/// Resolve a path by descending from the synthetic root one function at a
/// time. An empty path, or any step without a matching child, is not found.
pub fn resolve(path: &CallNodePath, table: &CallNodeTable) -> Option<CallNodeIndex> {
    let mut node = None;
    for &func in path.funcs() {
        node = Some(table.child(node, func)?);
    }
    node
}

/// Resolve each path independently, preserving order.
pub fn resolve_all(paths: &[CallNodePath], table: &CallNodeTable) -> Vec<Option<CallNodeIndex>> {
    paths.iter().map(|path| resolve(path, table)).collect()
}

/// The path leading to `node`.
pub fn path_of(node: CallNodeIndex, table: &CallNodeTable) -> CallNodePath {
    let mut funcs: Vec<FuncIndex> = table.ancestors(node).map(|n| table.func(n)).collect();
    funcs.reverse();
    CallNodePath(funcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::call_node::tests::{abc_thread, info_for};

    #[test]
    fn round_trips_every_node() {
        let info = info_for(&abc_thread());
        let table = info.table();
        for node in table.iter() {
            assert_eq!(resolve(&path_of(node, table), table), Some(node));
        }
    }

    #[test]
    fn unknown_step_is_not_found() {
        let info = info_for(&abc_thread());
        let table = info.table();
        assert_eq!(resolve(&CallNodePath::new(vec![0, 1]), table), Some(CallNodeIndex::new(1)));
        assert_eq!(resolve(&CallNodePath::new(vec![1]), table), None);
        assert_eq!(resolve(&CallNodePath::new(vec![0, 1, 2]), table), None);
        assert_eq!(resolve(&CallNodePath::default(), table), None);
    }

    #[test]
    fn batch_preserves_order_and_reports_each_entry() {
        let info = info_for(&abc_thread());
        let paths = vec![
            CallNodePath::new(vec![0, 2]),
            CallNodePath::new(vec![2]),
            CallNodePath::new(vec![0]),
        ];
        assert_eq!(
            resolve_all(&paths, info.table()),
            vec![Some(CallNodeIndex::new(2)), None, Some(CallNodeIndex::new(0))]
        );
    }

    #[test]
    fn deserializes_as_plain_array() {
        let path: CallNodePath = serde_json::from_str("[0, 2]").unwrap();
        assert_eq!(path, CallNodePath::new(vec![0, 2]));
    }
}
