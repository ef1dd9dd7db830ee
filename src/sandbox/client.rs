//! Parent side of the sandbox: spawns the runner child and reads its response.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::protocol::{RunnerRequest, RunnerResponse};
use crate::config::SandboxSettings;
use crate::errors::SandboxError;

/// Lines of child stderr kept in error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Hidden subcommand the child is started with.
pub const RUNNER_SUBCOMMAND: &str = "sandbox-runner";

/// Executes a request somewhere isolated and returns the runner response.
///
/// `Err` is reserved for infrastructure failures; problems in the code under
/// test come back inside the response.
#[async_trait]
pub trait TraceExecutor: Send + Sync {
    async fn execute(&self, request: &RunnerRequest) -> Result<RunnerResponse, SandboxError>;
}

/// Runs each request in a fresh child process under a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    max_steps: Option<usize>,
}

impl SandboxClient {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            max_steps: None,
        }
    }

    /// Build from settings; without a configured runner the current
    /// executable is re-invoked with the hidden runner subcommand.
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self, SandboxError> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = match settings.runner.split_first() {
            Some((program, args)) => Self::new(program, args.to_vec(), timeout),
            None => Self::new(
                std::env::current_exe()?,
                vec![RUNNER_SUBCOMMAND.to_string()],
                timeout,
            ),
        };
        Ok(client.with_max_steps(settings.max_steps))
    }

    /// Step budget applied to requests that do not carry their own.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn encode(&self, request: &RunnerRequest) -> Result<Vec<u8>, SandboxError> {
        let encoded = match (request.max_steps, self.max_steps) {
            (None, Some(max_steps)) => {
                serde_json::to_vec(&request.clone().with_max_steps(max_steps))
            }
            _ => serde_json::to_vec(request),
        };
        encoded.map_err(SandboxError::Serialize)
    }
}

#[async_trait]
impl TraceExecutor for SandboxClient {
    async fn execute(&self, request: &RunnerRequest) -> Result<RunnerResponse, SandboxError> {
        let payload = self.encode(request)?;
        tracing::debug!(
            program = %self.program.display(),
            sources = request.sources.len(),
            blocks = request.blocks.len(),
            timeout_secs = self.timeout.as_secs(),
            "spawning sandbox runner"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // The deadline covers the stdin write too: a child that never reads
        // would otherwise block us once the pipe buffer fills.
        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut pipe) = stdin {
                match pipe.write_all(&payload).await {
                    Ok(()) => {}
                    // The child exited early; its output still explains why.
                    Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                        tracing::debug!("sandbox runner closed stdin before reading the request");
                    }
                    Err(err) => return Err(err),
                }
            }
            child.wait_with_output().await
        };

        // On expiry the exchange is dropped with the child and kill_on_drop reaps it.
        let output = match timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "sandbox runner timed out; killed"
                );
                return Err(SandboxError::Timeout(self.timeout));
            }
        };

        parse_response(
            &output.stdout,
            &output.stderr,
            output.status.code(),
            output.status.success(),
        )
    }
}

/// Decode the child's stdout.
///
/// The whole (trimmed) output is tried first, then its last non-empty line,
/// which tolerates stray writes that slipped past the stdout redirect.
pub fn parse_response(
    stdout: &[u8],
    stderr: &[u8],
    exit_code: Option<i32>,
    success: bool,
) -> Result<RunnerResponse, SandboxError> {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr_tail = tail(&String::from_utf8_lossy(stderr), STDERR_TAIL_LINES);
    let body = stdout.trim();

    if body.is_empty() {
        return Err(SandboxError::ChildFailed {
            exit_code,
            stderr_tail,
        });
    }

    let first_error = match serde_json::from_str::<RunnerResponse>(body) {
        Ok(response) => return Ok(response),
        Err(err) => err,
    };
    let last_line = body.lines().rev().find(|line| !line.trim().is_empty());
    if let Some(line) = last_line
        && let Ok(response) = serde_json::from_str::<RunnerResponse>(line.trim())
    {
        tracing::debug!("sandbox stdout had leading noise; used last line");
        return Ok(response);
    }

    if success {
        Err(SandboxError::MalformedResponse {
            reason: first_error.to_string(),
            stderr_tail,
        })
    } else {
        Err(SandboxError::ChildFailed {
            exit_code,
            stderr_tail,
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
