//! Typed error hierarchy for tracemend.
//!
//! One enum per subsystem:
//! - `CfgError`: reading and parsing sources for graph construction
//! - `SandboxError`: infrastructure failures around the sandbox child process
//! - `ReasoningError`: reasoning-service calls, split into transient and permanent
//! - `OrchestratorError`: repair-loop failures that cannot become a payload
//!
//! Code-level problems in the user's sources (load errors, failing tests) are
//! never errors at this level; they travel as data in the runner response.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from CFG construction.
#[derive(Debug, Error)]
pub enum CfgError {
    #[error("Failed to read source file at {path}: {source}")]
    SourceReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Python grammar could not be loaded: {0}")]
    Grammar(String),

    #[error("Parser returned no tree for {path}")]
    ParseAborted { path: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Infrastructure errors from running the sandbox child.
///
/// None of these say anything about the correctness of the code under test.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to spawn sandbox runner {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sandbox runner timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Sandbox runner exited with code {exit_code:?} without a response: {stderr_tail}")]
    ChildFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Sandbox runner returned malformed JSON: {reason}")]
    MalformedResponse { reason: String, stderr_tail: String },

    #[error("Failed to serialize sandbox request: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors from the reasoning service.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("Transient reasoning failure: {0}")]
    Transient(String),

    #[error("Reasoning request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Reasoning reply could not be parsed: {0}")]
    MalformedOutput(String),

    #[error("Reasoning backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReasoningError {
    /// Only transient failures are worth another request.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReasoningError::Transient(_))
    }
}

/// Errors that abort a repair run before any payload can be built.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No source files were provided")]
    NoSources,

    #[error("Block derivation failed: {0}")]
    Cfg(#[from] CfgError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
