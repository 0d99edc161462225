pub mod allocations;

pub use allocations::{
    to_allocations, to_deallocation_sites, to_deallocations_memory, to_retained_allocations,
};
