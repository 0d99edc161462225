//! Views over a native allocation stream.
//!
//! Each transform returns a new table; the input is never modified. Rows
//! keep their original relative order.

use std::collections::HashMap;

use log::debug;
use stackscope_protocol::NativeAllocationsTable;

use crate::error::{Capability, ViewError};

fn memory_addresses<'a>(
    table: &'a NativeAllocationsTable,
    transform: &'static str,
) -> Result<&'a [u64], ViewError> {
    table
        .memory_address
        .as_deref()
        .ok_or(ViewError::CapabilityMissing {
            transform,
            capability: Capability::NativeMemoryAddresses,
        })
}

fn filter_rows(
    table: &NativeAllocationsTable,
    keep: impl Fn(f64) -> bool,
) -> NativeAllocationsTable {
    let mut out = table.empty_like();
    for (row, &weight) in table.weight.iter().enumerate() {
        if keep(weight) {
            out.push_row_from(table, row, weight);
        }
    }
    out
}

/// Only allocations (positive weights).
pub fn to_allocations(table: &NativeAllocationsTable) -> NativeAllocationsTable {
    filter_rows(table, |weight| weight > 0.0)
}

/// Only deallocations (negative weights), attributed to the stack that
/// freed the memory.
pub fn to_deallocation_sites(table: &NativeAllocationsTable) -> NativeAllocationsTable {
    filter_rows(table, |weight| weight < 0.0)
}

/// Allocations still alive at the end of the inspected range.
///
/// An allocation is released by the first later deallocation at the same
/// address. Rows at or after `range_end` do not count: later allocations
/// are left out and later deallocations release nothing. An address
/// reused by a second allocation without a recorded deallocation leaves the
/// first one retained, since its release was never observed.
pub fn to_retained_allocations(
    table: &NativeAllocationsTable,
    range_end: Option<f64>,
) -> Result<NativeAllocationsTable, ViewError> {
    let addresses = memory_addresses(table, "retained allocations")?;

    let mut live: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut released = vec![false; table.len()];
    let in_range = |row: usize| range_end.is_none_or(|end| table.time[row] < end);
    for (row, (&weight, &address)) in table.weight.iter().zip(addresses).enumerate() {
        if !in_range(row) {
            continue;
        }
        if weight > 0.0 {
            live.entry(address).or_default().push(row);
        } else if weight < 0.0 {
            // Frees the most recent allocation at this address.
            if let Some(allocation) = live.get_mut(&address).and_then(Vec::pop) {
                released[allocation] = true;
            }
        }
    }

    let mut out = table.empty_like();
    for (row, &weight) in table.weight.iter().enumerate() {
        if weight > 0.0 && !released[row] && in_range(row) {
            out.push_row_from(table, row, weight);
        }
    }
    debug!(
        "{} of {} rows are retained allocations",
        out.len(),
        table.len()
    );
    Ok(out)
}

/// Deallocations that release a recorded allocation, reported at the
/// deallocation's stack and time with the allocation's size as a negative
/// weight. Deallocations without a matching allocation are dropped.
pub fn to_deallocations_memory(
    table: &NativeAllocationsTable,
) -> Result<NativeAllocationsTable, ViewError> {
    let addresses = memory_addresses(table, "deallocated memory")?;

    let mut live: HashMap<u64, Vec<f64>> = HashMap::new();
    let mut out = table.empty_like();
    for (row, (&weight, &address)) in table.weight.iter().zip(addresses).enumerate() {
        if weight > 0.0 {
            live.entry(address).or_default().push(weight);
        } else if weight < 0.0
            && let Some(bytes) = live.get_mut(&address).and_then(Vec::pop)
        {
            out.push_row_from(table, row, -bytes);
        }
    }
    debug!(
        "{} of {} rows are paired deallocations",
        out.len(),
        table.len()
    );
    Ok(out)
}
