pub mod memo;
pub mod registry;
pub mod thread_view;

pub use memo::{Inputs, Memo};
pub use registry::SelectorRegistry;
pub use thread_view::{ThreadGraph, ThreadView};
