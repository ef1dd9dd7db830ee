//! One traced execution: `tracemend trace`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tracemend::cfg::{build_project_blocking, derive_blocks};
use tracemend::config::TracemendConfig;
use tracemend::sandbox::{RunnerRequest, SandboxClient, TraceExecutor};

use super::{emit_json, load_blocks, load_sources};

pub async fn cmd_trace(
    project_dir: &Path,
    tests: &Path,
    blocks: Option<&Path>,
    max_steps: Option<usize>,
    paths: &[PathBuf],
) -> Result<()> {
    let config = TracemendConfig::load(project_dir)?;
    let sources = load_sources(project_dir, paths)?;
    let tests_code = std::fs::read_to_string(tests)
        .with_context(|| format!("Failed to read test file {}", tests.display()))?;

    let blocks = match blocks {
        Some(path) => load_blocks(path)?,
        None => derive_blocks(&build_project_blocking(sources.clone()).await?),
    };

    let mut request = RunnerRequest::new(sources, blocks, tests_code);
    if let Some(max_steps) = max_steps {
        request = request.with_max_steps(max_steps);
    }

    let client = SandboxClient::from_settings(&config.sandbox)?;
    let response = client.execute(&request).await?;
    if !response.ok {
        tracing::warn!(
            load_errors = response.source_loading_errors.len(),
            test_error = response.error.is_some(),
            "run did not complete cleanly"
        );
    }
    emit_json(&response, None)
}
