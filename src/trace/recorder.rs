use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{BlockRegistry, TraceEntry};

/// Default step budget for one sandboxed execution.
pub const MAX_TRACE_STEPS: usize = 2000;

/// Unmatched positions kept for diagnostics.
pub const UNMATCHED_SAMPLE_LIMIT: usize = 10;

/// What the recorder did with one line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// File outside the allow-list.
    Ignored,
    Recorded { step_index: usize },
    Unmatched,
    /// Matched a block but the step budget is spent.
    BudgetExhausted,
}

/// Counters describing a finished trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDiagnostics {
    pub total_events: u64,
    #[serde(default)]
    pub unmatched_samples: Vec<(String, usize)>,
    /// Matched positions that arrived after the budget ran out.
    #[serde(default)]
    pub dropped_matches: u64,
}

/// Turns interpreter line events into trace entries.
///
/// One recorder serves exactly one execution; the step counter never
/// resets, so indices are strictly increasing and never exceed the budget.
#[derive(Debug)]
pub struct TraceRecorder {
    registry: BlockRegistry,
    max_steps: usize,
    allowed_files: Option<HashSet<String>>,
    entries: Vec<TraceEntry>,
    diagnostics: TraceDiagnostics,
}

impl TraceRecorder {
    pub fn new(registry: BlockRegistry, max_steps: usize) -> Self {
        Self {
            registry,
            max_steps,
            allowed_files: None,
            entries: Vec::new(),
            diagnostics: TraceDiagnostics::default(),
        }
    }

    pub fn with_allowed_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    /// Handle one line event. `capture` runs only when an entry is recorded.
    pub fn on_line<F>(&mut self, file_path: &str, line: usize, capture: F) -> LineOutcome
    where
        F: FnOnce() -> Map<String, Value>,
    {
        if let Some(allowed) = &self.allowed_files
            && !allowed.contains(file_path)
        {
            return LineOutcome::Ignored;
        }
        self.diagnostics.total_events += 1;

        let Some(block_id) = self.registry.lookup(file_path, line) else {
            if self.diagnostics.unmatched_samples.len() < UNMATCHED_SAMPLE_LIMIT {
                self.diagnostics
                    .unmatched_samples
                    .push((file_path.to_string(), line));
            }
            return LineOutcome::Unmatched;
        };

        if self.entries.len() >= self.max_steps {
            self.diagnostics.dropped_matches += 1;
            return LineOutcome::BudgetExhausted;
        }

        let step_index = self.entries.len();
        let entry = TraceEntry {
            block_id: block_id.to_string(),
            step_index,
            file_path: file_path.to_string(),
            line_no: line,
            locals: capture(),
        };
        self.entries.push(entry);
        LineOutcome::Recorded { step_index }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn diagnostics(&self) -> &TraceDiagnostics {
        &self.diagnostics
    }

    pub fn is_exhausted(&self) -> bool {
        self.entries.len() >= self.max_steps
    }

    pub fn finish(self) -> (Vec<TraceEntry>, TraceDiagnostics) {
        (self.entries, self.diagnostics)
    }
}
