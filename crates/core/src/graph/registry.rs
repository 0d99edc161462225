use std::collections::HashMap;

use crate::graph::thread_view::ThreadGraph;
use crate::session::ThreadKey;

/// One derivation graph per thread. Graphs never share cached values, so
/// reading one thread's views cannot invalidate another's.
#[derive(Debug, Default)]
pub struct SelectorRegistry {
    graphs: HashMap<ThreadKey, ThreadGraph>,
}

impl SelectorRegistry {
    /// The graph for `key`, created empty on first access.
    pub fn graph_mut(&mut self, key: ThreadKey) -> &mut ThreadGraph {
        self.graphs.entry(key).or_default()
    }

    /// The graph for `key`, if its views were ever read.
    pub fn graph(&self, key: ThreadKey) -> Option<&ThreadGraph> {
        self.graphs.get(&key)
    }

    /// Drop a thread's graph together with everything it cached.
    pub fn remove(&mut self, key: ThreadKey) -> Option<ThreadGraph> {
        self.graphs.remove(&key)
    }

    /// Number of threads with a graph.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
