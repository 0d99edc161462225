use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use stackscope_protocol::{Capabilities, ValueUnit};
use thiserror::Error;

use crate::error::Capability;
use crate::graph::memo::Inputs;

/// Which event stream a call tree summarizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryStrategy {
    #[default]
    Timing,
    JsAllocations,
    NativeAllocations,
    NativeRetainedAllocations,
    NativeDeallocationsSites,
    NativeDeallocationsMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("unknown summary strategy `{0}`")]
    Unknown(String),
}

impl SummaryStrategy {
    pub const ALL: [SummaryStrategy; 6] = [
        Self::Timing,
        Self::JsAllocations,
        Self::NativeAllocations,
        Self::NativeRetainedAllocations,
        Self::NativeDeallocationsSites,
        Self::NativeDeallocationsMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timing => "timing",
            Self::JsAllocations => "js-allocations",
            Self::NativeAllocations => "native-allocations",
            Self::NativeRetainedAllocations => "native-retained-allocations",
            Self::NativeDeallocationsSites => "native-deallocations-sites",
            Self::NativeDeallocationsMemory => "native-deallocations-memory",
        }
    }

    /// Whether a thread with `capabilities` can feed this strategy.
    pub fn is_supported_by(&self, capabilities: &Capabilities) -> bool {
        match self {
            Self::Timing => true,
            Self::JsAllocations => capabilities.js_allocations,
            Self::NativeAllocations
            | Self::NativeRetainedAllocations
            | Self::NativeDeallocationsSites
            | Self::NativeDeallocationsMemory => capabilities.native_allocations,
        }
    }

    /// The first piece of recorded data this strategy needs that
    /// `capabilities` says the thread lacks. Strategies that pair
    /// allocations with deallocations also need memory addresses.
    pub fn missing_capability(&self, capabilities: &Capabilities) -> Option<Capability> {
        match self {
            Self::Timing => None,
            Self::JsAllocations => {
                (!capabilities.js_allocations).then_some(Capability::JsAllocations)
            }
            Self::NativeAllocations | Self::NativeDeallocationsSites => {
                (!capabilities.native_allocations).then_some(Capability::NativeAllocations)
            }
            Self::NativeRetainedAllocations | Self::NativeDeallocationsMemory => {
                if !capabilities.native_allocations {
                    Some(Capability::NativeAllocations)
                } else if !capabilities.native_memory_addresses {
                    Some(Capability::NativeMemoryAddresses)
                } else {
                    None
                }
            }
        }
    }

    /// Name of the transform behind this strategy, used in errors.
    pub fn transform_name(&self) -> &'static str {
        match self {
            Self::Timing => "timing summary",
            Self::JsAllocations => "JS allocation summary",
            Self::NativeAllocations => "native allocation summary",
            Self::NativeRetainedAllocations => "retained allocations",
            Self::NativeDeallocationsSites => "deallocation sites",
            Self::NativeDeallocationsMemory => "deallocated memory",
        }
    }

    /// Bytes for allocation strategies, sample counts for timing.
    pub fn value_unit(&self) -> ValueUnit {
        match self {
            Self::Timing => ValueUnit::Samples,
            Self::JsAllocations
            | Self::NativeAllocations
            | Self::NativeRetainedAllocations
            | Self::NativeDeallocationsSites
            | Self::NativeDeallocationsMemory => ValueUnit::Bytes,
        }
    }
}

impl std::fmt::Display for SummaryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryStrategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| StrategyError::Unknown(s.to_string()))
    }
}

impl Inputs for SummaryStrategy {
    #[inline]
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
}

/// The strategy actually used for a thread: the last one the user picked
/// if the thread recorded the data it needs, otherwise timing.
pub fn resolve_strategy(
    capabilities: &Capabilities,
    last_selected: SummaryStrategy,
) -> SummaryStrategy {
    if last_selected.is_supported_by(capabilities) {
        last_selected
    } else {
        debug!("thread cannot summarize `{last_selected}`, falling back to timing");
        SummaryStrategy::Timing
    }
}
