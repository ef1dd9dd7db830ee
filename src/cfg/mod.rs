//! Control-flow graphs for Python sources.
//!
//! | Module    | Contents                                               |
//! |-----------|--------------------------------------------------------|
//! | `types`   | Node/edge/graph data model                             |
//! | `parse`   | Thread-local tree-sitter parser                        |
//! | `builder` | Per-unit statement graph construction                  |
//! | `xref`    | Name-based cross-reference resolution                  |
//! | `blocks`  | Basic-block derivation for the tracer                  |

pub mod blocks;
pub mod builder;
pub mod parse;
pub mod types;
pub mod xref;

pub use blocks::derive_blocks;
pub use builder::{MODULE_UNIT, build_file_graph};
pub use types::{
    CrossRefKind, CrossReference, Edge, EdgeKind, EdgeLabel, FileGraph, FunctionGraph, Node,
    NodeKind, NodeMetadata, ProjectCfg,
};

use crate::errors::CfgError;
use crate::source::SourceFile;

/// Build graphs for every file, then resolve cross-references once.
pub fn build_project(sources: &[SourceFile]) -> Result<ProjectCfg, CfgError> {
    let files = sources
        .iter()
        .map(|s| build_file_graph(&s.file_path, &s.code))
        .collect::<Result<Vec<_>, _>>()?;
    let cross_references = xref::resolve_cross_references(&files);
    tracing::debug!(
        files = files.len(),
        cross_references = cross_references.len(),
        "built project cfg"
    );
    Ok(ProjectCfg {
        files,
        cross_references,
    })
}

/// [`build_project`] on the blocking pool, for use from async code.
pub async fn build_project_blocking(sources: Vec<SourceFile>) -> Result<ProjectCfg, CfgError> {
    tokio::task::spawn_blocking(move || build_project(&sources))
        .await
        .map_err(|e| CfgError::Other(anyhow::anyhow!("cfg task failed: {e}")))?
}
