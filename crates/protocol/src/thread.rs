use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::shared_str::SharedStr;
use crate::tables::{
    FrameTable, FuncTable, JsAllocationsTable, NativeAllocationsTable, SamplesTable, StackTable,
    TableError,
};
use crate::types::{CategoryIndex, FrameIndex, FuncIndex, StackIndex};

/// The kinds of data a thread recorded beyond plain samples.
///
/// Consumers check this descriptor instead of probing optional tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub js_allocations: bool,
    pub native_allocations: bool,
    /// Native allocations carry memory addresses, so allocations can be
    /// paired with deallocations.
    pub native_memory_addresses: bool,
}

/// One thread of an imported profile.
///
/// Tables sit behind `Arc` so that a filter step can replace only the
/// tables it changes and share the rest. Views are memoized on table
/// identity; a producer must never mutate a table it has published.
#[derive(Debug, Clone)]
pub struct Thread {
    pub name: SharedStr,
    pub tid: u32,
    pub stack_table: Arc<StackTable>,
    pub frame_table: Arc<FrameTable>,
    pub func_table: Arc<FuncTable>,
    pub samples: Arc<SamplesTable>,
    pub js_allocations: Option<Arc<JsAllocationsTable>>,
    pub native_allocations: Option<Arc<NativeAllocationsTable>>,
    /// Opt-out for threads too fine-grained to classify every sample
    /// against a selection.
    pub skip_sample_classification: bool,
}

impl Thread {
    pub fn new(
        name: impl Into<SharedStr>,
        tid: u32,
        stack_table: StackTable,
        frame_table: FrameTable,
        func_table: FuncTable,
        samples: SamplesTable,
    ) -> Self {
        Self {
            name: name.into(),
            tid,
            stack_table: Arc::new(stack_table),
            frame_table: Arc::new(frame_table),
            func_table: Arc::new(func_table),
            samples: Arc::new(samples),
            js_allocations: None,
            native_allocations: None,
            skip_sample_classification: false,
        }
    }

    pub fn with_js_allocations(mut self, table: JsAllocationsTable) -> Self {
        self.js_allocations = Some(Arc::new(table));
        self
    }

    pub fn with_native_allocations(mut self, table: NativeAllocationsTable) -> Self {
        self.native_allocations = Some(Arc::new(table));
        self
    }

    /// A copy of this thread with its samples replaced and every other
    /// table shared.
    pub fn with_samples(&self, samples: SamplesTable) -> Self {
        Self {
            samples: Arc::new(samples),
            ..self.clone()
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            js_allocations: self.js_allocations.is_some(),
            native_allocations: self.native_allocations.is_some(),
            native_memory_addresses: self
                .native_allocations
                .as_ref()
                .is_some_and(|table| table.memory_address.is_some()),
        }
    }

    /// Check column lengths and cross-table references.
    pub fn validate(&self) -> Result<(), TableError> {
        self.func_table.validate()?;
        self.frame_table.validate(self.func_table.len())?;
        let stack_count = self.stack_table.len();
        self.stack_table.validate(self.frame_table.len())?;
        self.samples.validate(stack_count)?;
        if let Some(table) = &self.js_allocations {
            table.validate(stack_count)?;
        }
        if let Some(table) = &self.native_allocations {
            table.validate(stack_count)?;
        }
        Ok(())
    }

    /// Read a column-oriented thread and validate it.
    pub fn from_json(data: &[u8]) -> Result<Self, TableError> {
        let raw: RawThread = serde_json::from_slice(data)?;
        let thread = Thread::from(raw);
        thread.validate()?;
        Ok(thread)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThread {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tid: u32,
    stack_table: RawStackTable,
    frame_table: RawFrameTable,
    func_table: RawFuncTable,
    samples: RawSamples,
    #[serde(default)]
    js_allocations: Option<RawJsAllocations>,
    #[serde(default)]
    native_allocations: Option<RawNativeAllocations>,
    #[serde(default)]
    skip_sample_classification: bool,
}

#[derive(Debug, Deserialize)]
struct RawStackTable {
    frame: Vec<FrameIndex>,
    prefix: Vec<Option<StackIndex>>,
}

#[derive(Debug, Deserialize)]
struct RawFrameTable {
    func: Vec<FuncIndex>,
    #[serde(default)]
    category: Option<Vec<Option<CategoryIndex>>>,
}

#[derive(Debug, Deserialize)]
struct RawFuncTable {
    name: Vec<String>,
    #[serde(default)]
    resource: Option<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawSamples {
    stack: Vec<Option<StackIndex>>,
    time: Vec<f64>,
    #[serde(default)]
    weight: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct RawJsAllocations {
    stack: Vec<Option<StackIndex>>,
    time: Vec<f64>,
    weight: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNativeAllocations {
    stack: Vec<Option<StackIndex>>,
    time: Vec<f64>,
    weight: Vec<f64>,
    #[serde(default)]
    memory_address: Option<Vec<u64>>,
}

impl From<RawThread> for Thread {
    fn from(raw: RawThread) -> Self {
        let frame_count = raw.frame_table.func.len();
        let func_count = raw.func_table.name.len();
        let frame_table = FrameTable {
            category: raw
                .frame_table
                .category
                .unwrap_or_else(|| vec![None; frame_count]),
            func: raw.frame_table.func,
        };
        let func_table = FuncTable {
            resource: raw
                .func_table
                .resource
                .map(|resources| resources.into_iter().map(|r| r.map(SharedStr::from)).collect())
                .unwrap_or_else(|| vec![None; func_count]),
            name: raw.func_table.name.into_iter().map(SharedStr::from).collect(),
        };
        let stack_table = StackTable {
            frame: raw.stack_table.frame,
            prefix: raw.stack_table.prefix,
        };
        let samples = SamplesTable {
            stack: raw.samples.stack,
            time: raw.samples.time,
            weight: raw.samples.weight,
        };

        let mut thread = Thread::new(
            raw.name.unwrap_or_else(|| format!("thread-{}", raw.tid)),
            raw.tid,
            stack_table,
            frame_table,
            func_table,
            samples,
        );
        thread.skip_sample_classification = raw.skip_sample_classification;
        if let Some(js) = raw.js_allocations {
            thread = thread.with_js_allocations(JsAllocationsTable {
                stack: js.stack,
                time: js.time,
                weight: js.weight,
            });
        }
        if let Some(native) = raw.native_allocations {
            thread = thread.with_native_allocations(NativeAllocationsTable {
                stack: native.stack,
                time: native.time,
                weight: native.weight,
                memory_address: native.memory_address,
            });
        }
        thread
    }
}
