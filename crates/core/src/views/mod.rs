pub mod call_tree;
pub mod flame_graph;
pub mod selection;
pub mod stack_timing;

pub use call_tree::{
    CallNodeSummary, CallTree, WeightedRows, compute_call_tree, compute_call_tree_for_strategy,
};
pub use flame_graph::{FlameGraphBox, FlameGraphTiming, compute_flame_graph_timing};
pub use selection::{
    SampleTreeOrder, SelectedState, TreeOrder, classify_samples, sample_call_nodes,
};
pub use stack_timing::{StackTiming, StackTimingBox, compute_stack_timing};
