use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared_str::SharedStr;
use crate::types::{CategoryIndex, FrameIndex, FuncIndex, StackIndex};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{table}: column `{column}` has {actual} rows, expected {expected}")]
    ColumnLength {
        table: &'static str,
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("stack {stack} has prefix {prefix}, which does not precede it")]
    PrefixOrder { stack: StackIndex, prefix: StackIndex },
    #[error("{table} row {row} is earlier than the row before it")]
    TimeOrder { table: &'static str, row: usize },
    #[error("{table} row {row} refers to {target} {index}, which is out of range")]
    DanglingIndex {
        table: &'static str,
        row: usize,
        target: &'static str,
        index: usize,
    },
}

fn check_len(
    table: &'static str,
    column: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), TableError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TableError::ColumnLength {
            table,
            column,
            expected,
            actual,
        })
    }
}

/// Rows must be recorded in time order; equal times are allowed.
fn check_time_order(table: &'static str, time: &[f64]) -> Result<(), TableError> {
    match time.windows(2).position(|pair| pair[1] < pair[0]) {
        Some(row) => Err(TableError::TimeOrder { table, row: row + 1 }),
        None => Ok(()),
    }
}

fn check_stacks(
    table: &'static str,
    stack: &[Option<StackIndex>],
    stack_count: usize,
) -> Result<(), TableError> {
    for (row, s) in stack.iter().enumerate() {
        if let Some(s) = *s
            && s >= stack_count
        {
            return Err(TableError::DanglingIndex {
                table,
                row,
                target: "stack",
                index: s,
            });
        }
    }
    Ok(())
}

/// Raw stacks: each row is a frame plus the stack it was called from.
/// A prefix always precedes the stack that refers to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTable {
    pub frame: Vec<FrameIndex>,
    pub prefix: Vec<Option<StackIndex>>,
}

impl StackTable {
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Append a stack and return its index.
    pub fn push(&mut self, frame: FrameIndex, prefix: Option<StackIndex>) -> StackIndex {
        self.frame.push(frame);
        self.prefix.push(prefix);
        self.frame.len() - 1
    }

    /// Check that every prefix precedes its stack and every frame exists.
    pub fn validate(&self, frame_count: usize) -> Result<(), TableError> {
        check_len("stackTable", "prefix", self.len(), self.prefix.len())?;
        for (stack, (&frame, &prefix)) in self.frame.iter().zip(&self.prefix).enumerate() {
            if frame >= frame_count {
                return Err(TableError::DanglingIndex {
                    table: "stackTable",
                    row: stack,
                    target: "frame",
                    index: frame,
                });
            }
            if let Some(prefix) = prefix
                && prefix >= stack
            {
                return Err(TableError::PrefixOrder { stack, prefix });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTable {
    pub func: Vec<FuncIndex>,
    /// `None` falls back to the profile's default category.
    pub category: Vec<Option<CategoryIndex>>,
}

impl FrameTable {
    pub fn len(&self) -> usize {
        self.func.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_empty()
    }

    /// Append a frame and return its index.
    pub fn push(&mut self, func: FuncIndex, category: Option<CategoryIndex>) -> FrameIndex {
        self.func.push(func);
        self.category.push(category);
        self.func.len() - 1
    }

    pub fn validate(&self, func_count: usize) -> Result<(), TableError> {
        check_len("frameTable", "category", self.len(), self.category.len())?;
        for (row, &func) in self.func.iter().enumerate() {
            if func >= func_count {
                return Err(TableError::DanglingIndex {
                    table: "frameTable",
                    row,
                    target: "func",
                    index: func,
                });
            }
        }
        Ok(())
    }
}

/// Function identities. Two frames calling the same function share a row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncTable {
    pub name: Vec<SharedStr>,
    /// Library, script or origin the function belongs to.
    pub resource: Vec<Option<SharedStr>>,
}

impl FuncTable {
    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Append a function and return its index.
    pub fn push(&mut self, name: impl Into<SharedStr>, resource: Option<SharedStr>) -> FuncIndex {
        self.name.push(name.into());
        self.resource.push(resource);
        self.name.len() - 1
    }

    pub fn validate(&self) -> Result<(), TableError> {
        check_len("funcTable", "resource", self.len(), self.resource.len())
    }
}

/// The timing stream: one row per sample, ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplesTable {
    pub stack: Vec<Option<StackIndex>>,
    /// Milliseconds.
    pub time: Vec<f64>,
    /// Per-sample weight; every sample counts once when absent.
    pub weight: Option<Vec<f64>>,
}

impl SamplesTable {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Append a sample with weight 1.
    pub fn push(&mut self, stack: Option<StackIndex>, time: f64) {
        self.stack.push(stack);
        self.time.push(time);
        if let Some(weight) = &mut self.weight {
            weight.push(1.0);
        }
    }

    /// Weight of one sample; 1 when the table carries no weights.
    pub fn weight_at(&self, sample: usize) -> f64 {
        match &self.weight {
            Some(weight) => weight.get(sample).copied().unwrap_or(0.0),
            None => 1.0,
        }
    }

    pub fn validate(&self, stack_count: usize) -> Result<(), TableError> {
        check_len("samples", "time", self.len(), self.time.len())?;
        if let Some(weight) = &self.weight {
            check_len("samples", "weight", self.len(), weight.len())?;
        }
        check_time_order("samples", &self.time)?;
        check_stacks("samples", &self.stack, stack_count)
    }
}

/// JavaScript allocations; weights are positive byte counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsAllocationsTable {
    pub stack: Vec<Option<StackIndex>>,
    pub time: Vec<f64>,
    pub weight: Vec<f64>,
}

impl JsAllocationsTable {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn push(&mut self, stack: Option<StackIndex>, time: f64, bytes: f64) {
        self.stack.push(stack);
        self.time.push(time);
        self.weight.push(bytes);
    }

    pub fn validate(&self, stack_count: usize) -> Result<(), TableError> {
        check_len("jsAllocations", "time", self.len(), self.time.len())?;
        check_len("jsAllocations", "weight", self.len(), self.weight.len())?;
        check_time_order("jsAllocations", &self.time)?;
        check_stacks("jsAllocations", &self.stack, stack_count)
    }
}

/// Native allocations and deallocations. Positive weights are allocations,
/// negative weights are deallocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeAllocationsTable {
    pub stack: Vec<Option<StackIndex>>,
    pub time: Vec<f64>,
    pub weight: Vec<f64>,
    /// Present when the recording tracked addresses, which is what lets
    /// allocations be paired with their deallocations.
    pub memory_address: Option<Vec<u64>>,
}

impl NativeAllocationsTable {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// An empty table with the same column shape as `self`.
    pub fn empty_like(&self) -> Self {
        Self {
            stack: Vec::new(),
            time: Vec::new(),
            weight: Vec::new(),
            memory_address: self.memory_address.as_ref().map(|_| Vec::new()),
        }
    }

    pub fn push(&mut self, stack: Option<StackIndex>, time: f64, bytes: f64, address: Option<u64>) {
        self.stack.push(stack);
        self.time.push(time);
        self.weight.push(bytes);
        if let Some(addresses) = &mut self.memory_address {
            addresses.push(address.unwrap_or_default());
        }
    }

    /// Copy row `row` of `source` onto the end of this table, replacing its
    /// weight.
    pub fn push_row_from(&mut self, source: &NativeAllocationsTable, row: usize, weight: f64) {
        let address = source
            .memory_address
            .as_ref()
            .and_then(|addresses| addresses.get(row).copied());
        self.push(source.stack[row], source.time[row], weight, address);
    }

    pub fn validate(&self, stack_count: usize) -> Result<(), TableError> {
        check_len("nativeAllocations", "time", self.len(), self.time.len())?;
        check_len("nativeAllocations", "weight", self.len(), self.weight.len())?;
        if let Some(addresses) = &self.memory_address {
            check_len("nativeAllocations", "memoryAddress", self.len(), addresses.len())?;
        }
        check_time_order("nativeAllocations", &self.time)?;
        check_stacks("nativeAllocations", &self.stack, stack_count)
    }
}
