//! Sandbox child entry point: `tracemend sandbox-runner`.
//!
//! stdout carries exactly one JSON response; all logging goes to stderr.

use std::io::{Read, Write};

use anyhow::{Context, Result};

use tracemend::sandbox::{RunnerRequest, run_child};

pub fn cmd_sandbox_runner() -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read runner request from stdin")?;
    let request: RunnerRequest =
        serde_json::from_str(&input).context("Failed to parse runner request")?;
    tracing::debug!(
        sources = request.sources.len(),
        blocks = request.blocks.len(),
        "runner request received"
    );

    let response = run_child(&request)?;
    let json = serde_json::to_string(&response).context("Failed to serialize runner response")?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("Failed to write runner response")?;
    stdout.flush().context("Failed to flush runner response")?;
    Ok(())
}
