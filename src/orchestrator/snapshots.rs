//! Turning a trace into per-block before/after snapshots and mapping
//! assessment labels back onto blocks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::reasoning::{BlockAssessment, BlockInfo, RuntimeStateSnapshot};
use crate::source::SourceFile;
use crate::trace::{BasicBlock, TraceEntry};

/// One snapshot per block, in order of first execution.
///
/// `before` is the locals of the previously executed entry, `after` the
/// block's own locals. Repeat executions only advance the running
/// "previous" locals.
pub fn runtime_snapshots(trace: &[TraceEntry]) -> Vec<RuntimeStateSnapshot> {
    let mut ordered: Vec<&TraceEntry> = trace.iter().collect();
    ordered.sort_by_key(|entry| entry.step_index);

    let mut seen = HashSet::new();
    let mut previous = Map::new();
    let mut snapshots = Vec::new();
    for entry in ordered {
        if seen.insert(entry.block_id.as_str()) {
            snapshots.push(RuntimeStateSnapshot {
                block_id: entry.block_id.clone(),
                before: previous,
                after: entry.locals.clone(),
            });
        }
        previous = entry.locals.clone();
    }
    snapshots
}

/// Source lines `start..=end` (1-indexed), clamped to the file.
pub fn code_snippet(code: &str, start_line: usize, end_line: usize) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let start = start_line.saturating_sub(1).min(lines.len());
    let end = end_line.min(lines.len()).max(start);
    lines[start..end].join("\n")
}

pub fn block_infos(blocks: &[BasicBlock], sources: &[SourceFile]) -> HashMap<String, BlockInfo> {
    let code_by_file: HashMap<&str, &str> = sources
        .iter()
        .map(|s| (s.file_path.as_str(), s.code.as_str()))
        .collect();
    blocks
        .iter()
        .map(|block| {
            let code = code_by_file
                .get(block.file_path.as_str())
                .map(|code| code_snippet(code, block.start_line, block.end_line))
                .unwrap_or_default();
            let info = BlockInfo {
                id: block.block_id.clone(),
                code,
                file_path: block.file_path.clone(),
                start_line: block.start_line,
                end_line: block.end_line,
            };
            (block.block_id.clone(), info)
        })
        .collect()
}

/// Keep the snapshots whose block is known, paired with its info.
pub fn pair_with_blocks(
    snapshots: Vec<RuntimeStateSnapshot>,
    infos: &HashMap<String, BlockInfo>,
) -> (Vec<BlockInfo>, Vec<RuntimeStateSnapshot>) {
    snapshots
        .into_iter()
        .filter_map(|snapshot| {
            infos
                .get(&snapshot.block_id)
                .map(|info| (info.clone(), snapshot))
        })
        .unzip()
}

/// `BLOCK-7` → 7. Case and surrounding whitespace are ignored.
pub fn parse_block_label(label: &str) -> Option<usize> {
    let label = label.trim();
    let (prefix, number) = label.split_at_checked(6)?;
    if !prefix.eq_ignore_ascii_case("BLOCK-") {
        return None;
    }
    number.trim().parse().ok()
}

/// An assessment resolved to the block it is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockVerdict {
    pub block_id: String,
    pub correct: bool,
    pub explanation: String,
}

/// Resolve labels against the order blocks were submitted in. Labels that
/// do not parse or are out of range are dropped; the first verdict per
/// block wins.
pub fn resolve_assessments(
    assessments: &[BlockAssessment],
    submitted: &[BlockInfo],
) -> Vec<BlockVerdict> {
    let mut seen = HashSet::new();
    let mut verdicts = Vec::new();
    for assessment in assessments {
        let Some(block) = parse_block_label(&assessment.block_label).and_then(|i| submitted.get(i))
        else {
            tracing::debug!(label = %assessment.block_label, "ignoring unresolvable block label");
            continue;
        };
        if seen.insert(block.id.as_str()) {
            verdicts.push(BlockVerdict {
                block_id: block.id.clone(),
                correct: assessment.correct,
                explanation: assessment.explanation.clone(),
            });
        }
    }
    verdicts
}
