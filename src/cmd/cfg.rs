//! Static analysis commands: `tracemend cfg` and `tracemend blocks`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use tracemend::cfg::{build_project_blocking, derive_blocks};

use super::{emit_json, load_sources};

pub async fn cmd_cfg(project_dir: &Path, paths: &[PathBuf]) -> Result<()> {
    let sources = load_sources(project_dir, paths)?;
    let project = build_project_blocking(sources).await?;
    emit_json(&project, None)
}

pub async fn cmd_blocks(project_dir: &Path, paths: &[PathBuf]) -> Result<()> {
    let sources = load_sources(project_dir, paths)?;
    let project = build_project_blocking(sources).await?;
    emit_json(&derive_blocks(&project), None)
}
