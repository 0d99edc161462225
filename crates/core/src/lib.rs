//! Derived views over per-thread profile tables.
//!
//! A [`Session`] holds the inputs of every thread together with a cache of
//! everything derived from them: call-node tables, call trees under each
//! summary strategy, sample selection states, and the stack chart and flame
//! graph layouts. Views are computed on first read through
//! [`Session::thread_view`] and reused until one of their inputs is
//! replaced.

pub mod error;
pub mod graph;
pub mod model;
pub mod session;
pub mod strategy;
pub mod transforms;
pub mod views;

pub use error::{Capability, ViewError};
pub use graph::{SelectorRegistry, ThreadGraph, ThreadView};
pub use model::{CallNodeIndex, CallNodeInfo, CallNodePath, CallNodeTable};
pub use session::{
    ImplementationFilter, ProfileSettings, Session, SessionPreferences, ThreadInputs, ThreadKey,
    ThreadViewOptions,
};
pub use strategy::{StrategyError, SummaryStrategy, resolve_strategy};
pub use views::{
    CallNodeSummary, CallTree, FlameGraphBox, FlameGraphTiming, SampleTreeOrder, SelectedState,
    StackTiming, StackTimingBox,
};
