//! `tracemend repair`: the full repair pipeline.

use std::path::{Path, PathBuf};

use anyhow::Result;

use tracemend::config::TracemendConfig;
use tracemend::orchestrator::RepairOrchestrator;
use tracemend::reasoning::{PromptedReasoner, RetryPolicy, RetryingReasoner, model_from_settings};
use tracemend::sandbox::SandboxClient;
use tracemend::ui::build_payload;

use super::{emit_json, load_blocks, load_sources};

pub async fn cmd_repair(
    project_dir: &Path,
    task: &str,
    blocks: Option<&Path>,
    max_attempts: Option<u32>,
    output: Option<&Path>,
    paths: &[PathBuf],
) -> Result<()> {
    let config = TracemendConfig::load(project_dir)?;
    let sources = load_sources(project_dir, paths)?;
    let blocks = blocks.map(load_blocks).transpose()?;

    let model = model_from_settings(&config.reasoning)?;
    let reasoner = RetryingReasoner::new(
        PromptedReasoner::new(model),
        RetryPolicy::from(&config.reasoning.retry),
    );
    let executor = SandboxClient::from_settings(&config.sandbox)?;
    let orchestrator = RepairOrchestrator::new(reasoner, executor)
        .with_max_attempts(max_attempts.unwrap_or(config.repair.max_attempts));

    let outcome = orchestrator.run(task, &sources, blocks).await?;
    if let Some(reason) = &outcome.analysis.failure_reason {
        tracing::warn!(%reason, "repair finished without a full analysis");
    } else {
        tracing::info!(
            attempts = outcome.attempts.len(),
            assessed = outcome.analysis.assessments.len(),
            "repair finished"
        );
    }
    emit_json(&build_payload(&outcome), output)
}
