//! Basic-block derivation from statement graphs.
//!
//! A block is a maximal straight-line run of statement nodes. Its last line
//! is the exit position the tracer watches, so derived blocks must never
//! share `(file, end_line)`; a later block that would collide is dropped.

use std::collections::HashSet;

use super::types::{EdgeKind, FunctionGraph, Node, ProjectCfg};
use crate::trace::BasicBlock;

/// Derive tracing blocks for every unit in the project.
pub fn derive_blocks(project: &ProjectCfg) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    for file in &project.files {
        let stem = super::builder::module_stem(&file.file_path);
        let mut taken: HashSet<usize> = HashSet::new();
        for function in &file.functions {
            for (index, run) in straight_line_runs(function).into_iter().enumerate() {
                let lines = run.iter().filter_map(|n| n.line);
                let (Some(start), Some(end)) = (lines.clone().min(), lines.max()) else {
                    continue;
                };
                let block_id = format!("{stem}:{}:b{}", function.name, index + 1);
                if !taken.insert(end) {
                    tracing::debug!(
                        block = %block_id,
                        line = end,
                        "dropping block whose exit line is already registered"
                    );
                    continue;
                }
                blocks.push(BasicBlock {
                    block_id,
                    file_path: file.file_path.clone(),
                    start_line: start,
                    end_line: end,
                });
            }
        }
    }
    blocks
}

/// Split a unit's statement nodes into runs, in creation order.
fn straight_line_runs(function: &FunctionGraph) -> Vec<Vec<&Node>> {
    let mut runs: Vec<Vec<&Node>> = Vec::new();
    let mut previous: Option<&Node> = None;

    for node in function.nodes.iter().filter(|n| !n.kind.is_synthetic()) {
        let continues = previous.is_some_and(|prev| continues_run(function, prev, node));
        match runs.last_mut() {
            Some(run) if continues => run.push(node),
            _ => runs.push(vec![node]),
        }
        previous = Some(node);
    }
    runs
}

/// A node extends the current run only when its sole predecessor is the
/// previous statement, reached by plain fall-through.
fn continues_run(function: &FunctionGraph, prev: &Node, node: &Node) -> bool {
    if prev.kind.is_branch_header() || prev.kind.is_terminator() {
        return false;
    }
    let mut incoming = function.incoming(&node.id);
    match (incoming.next(), incoming.next()) {
        (Some(edge), None) => {
            edge.from == prev.id && edge.kind == EdgeKind::Control && edge.label.is_none()
        }
        _ => false,
    }
}
