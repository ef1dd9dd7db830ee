//! Sandboxed execution of Python sources under a block-level line tracer.
//!
//! | Module     | Side   | Purpose                                          |
//! |------------|--------|--------------------------------------------------|
//! | `protocol` | both   | JSON request/response exchanged over stdio       |
//! | `client`   | parent | spawn the runner, enforce the timeout            |
//! | `host`     | child  | embedded interpreter, module loading, tracing    |
//! | `classify` | child  | map interpreter exceptions onto error kinds      |
//! | `stubs`    | child  | pass-through stand-ins for web-framework symbols |

pub mod classify;
pub mod client;
#[cfg(feature = "python")]
pub mod host;
pub mod protocol;
#[cfg(feature = "python")]
mod stubs;

pub use client::{RUNNER_SUBCOMMAND, SandboxClient, TraceExecutor};
pub use protocol::{
    LoadErrorKind, RunSummary, RunnerRequest, RunnerResponse, SourceLoadError, TestError,
    TestErrorKind,
};

/// Child entry point: execute `request` in this process.
#[cfg(feature = "python")]
pub fn run_child(request: &RunnerRequest) -> anyhow::Result<RunnerResponse> {
    host::run(request)
}

#[cfg(not(feature = "python"))]
pub fn run_child(_request: &RunnerRequest) -> anyhow::Result<RunnerResponse> {
    anyhow::bail!("this build has no embedded interpreter; rebuild with the `python` feature")
}
