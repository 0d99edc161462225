use thiserror::Error;

/// Data a view needs from a thread beyond its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    JsAllocations,
    NativeAllocations,
    NativeMemoryAddresses,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JsAllocations => write!(f, "JS allocations"),
            Self::NativeAllocations => write!(f, "native allocations"),
            Self::NativeMemoryAddresses => write!(f, "native allocation memory addresses"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("{transform} requires {capability}, which this thread did not record")]
    CapabilityMissing {
        transform: &'static str,
        capability: Capability,
    },
}
