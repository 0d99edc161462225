use serde::{Deserialize, Serialize};

pub type StackIndex = usize;
pub type FrameIndex = usize;
pub type FuncIndex = usize;
pub type CategoryIndex = usize;

/// A half-open time range `[start, end)` in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// What the weights summarized by a call tree represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueUnit {
    /// Wall-clock time in milliseconds.
    Milliseconds,
    /// Sample counts (or sample weights).
    Samples,
    /// Memory in bytes; negative for deallocations.
    Bytes,
}

impl ValueUnit {
    /// Format a value in this unit for display.
    pub fn format_value(&self, value: f64) -> String {
        match self {
            Self::Milliseconds => {
                if value.abs() >= 1_000.0 {
                    format!("{:.2}s", value / 1_000.0)
                } else {
                    format!("{:.1}ms", value)
                }
            }
            Self::Samples => format!("{} samples", value as i64),
            Self::Bytes => {
                let sign = if value < 0.0 { "-" } else { "" };
                let magnitude = value.abs();
                if magnitude >= 1_073_741_824.0 {
                    format!("{sign}{:.1} GiB", magnitude / 1_073_741_824.0)
                } else if magnitude >= 1_048_576.0 {
                    format!("{sign}{:.1} MiB", magnitude / 1_048_576.0)
                } else if magnitude >= 1_024.0 {
                    format!("{sign}{:.1} KiB", magnitude / 1_024.0)
                } else {
                    format!("{sign}{} B", magnitude as u64)
                }
            }
        }
    }
}
