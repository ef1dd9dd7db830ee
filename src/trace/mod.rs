//! Block-level execution tracing.
//!
//! The registry maps exit positions to blocks, the recorder turns line events
//! into [`TraceEntry`] values, and `snapshot` bounds what gets captured.

pub mod recorder;
pub mod registry;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use recorder::{LineOutcome, MAX_TRACE_STEPS, TraceDiagnostics, TraceRecorder};
pub use registry::BlockRegistry;
pub use snapshot::{Inspect, Shape, SnapshotLimits, snapshot_locals, snapshot_value};

/// A contiguous line range traced as one unit. `end_line` is its exit position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasicBlock {
    pub block_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Locals captured when execution reached a block's exit position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub block_id: String,
    pub step_index: usize,
    pub file_path: String,
    pub line_no: usize,
    #[serde(default)]
    pub locals: Map<String, Value>,
}
