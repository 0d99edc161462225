pub mod call_node;
pub mod path;

pub use call_node::{
    CallNodeIndex, CallNodeInfo, CallNodeTable, compute_call_node_info, invert_call_node_info,
};
pub use path::{CallNodePath, path_of, resolve, resolve_all};
