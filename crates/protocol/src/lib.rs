pub mod shared_str;
pub mod tables;
pub mod thread;
pub mod types;

pub use shared_str::SharedStr;
pub use tables::{
    FrameTable, FuncTable, JsAllocationsTable, NativeAllocationsTable, SamplesTable, StackTable,
    TableError,
};
pub use thread::{Capabilities, Thread};
pub use types::{CategoryIndex, FrameIndex, FuncIndex, StackIndex, TimeRange, ValueUnit};
