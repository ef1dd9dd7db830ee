//! The repair loop: generate a test, enhance and execute until the run is
//! clean or the attempt budget is spent, then assess the traced blocks.

pub mod attempt;
pub mod repair;
pub mod selection;
pub mod snapshots;

pub use attempt::{AttemptHistory, AttemptStatus, ExecutionAttempt};
pub use repair::{DEFAULT_MAX_ATTEMPTS, DebugAnalysis, RepairOrchestrator, RepairOutcome};
pub use selection::{render_test_case, select_test_case};
pub use snapshots::{BlockVerdict, runtime_snapshots};
