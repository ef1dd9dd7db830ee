//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `cfg`    | `Cfg`, `Blocks`   |
//! | `trace`  | `Trace`           |
//! | `repair` | `Repair`          |
//! | `config` | `Config`          |
//! | `runner` | `SandboxRunner`   |

pub mod cfg;
pub mod config;
pub mod repair;
pub mod runner;
pub mod trace;

pub use cfg::{cmd_blocks, cmd_cfg};
pub use config::cmd_config;
pub use repair::cmd_repair;
pub use runner::cmd_sandbox_runner;
pub use trace::cmd_trace;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use tracemend::source::{SourceFile, collect_sources};
use tracemend::trace::BasicBlock;

/// Collect sources, failing when nothing was found.
fn load_sources(project_dir: &Path, paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let sources = collect_sources(paths, project_dir)?;
    if sources.is_empty() {
        anyhow::bail!("No Python sources found in the given paths");
    }
    tracing::debug!(files = sources.len(), "collected sources");
    Ok(sources)
}

fn load_blocks(path: &Path) -> Result<Vec<BasicBlock>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read blocks file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse blocks file {}", path.display()))
}

/// Pretty JSON to `output`, or to stdout.
fn emit_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote output");
        }
        None => println!("{json}"),
    }
    Ok(())
}
