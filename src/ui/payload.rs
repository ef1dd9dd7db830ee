use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::orchestrator::snapshots::code_snippet;
use crate::orchestrator::{DebugAnalysis, ExecutionAttempt, RepairOutcome};
use crate::reasoning::{ErrorRecord, TestCase, TestSuite};
use crate::sandbox::RunnerResponse;
use crate::trace::{BasicBlock, TraceEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pass,
    Fail,
    Unvisited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Loaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_index: usize,
    pub block_id: String,
    pub file_path: String,
    pub line_no: usize,
    pub before: Map<String, Value>,
    pub after: Map<String, Value>,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub block_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub explanation: String,
    /// Step index of the block's first execution, if it executed.
    pub first_failing_step: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub code: String,
    pub status: NodeStatus,
    pub execution_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Everything a presentation layer needs to render one repair run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPayload {
    pub run_id: Uuid,
    pub succeeded: bool,
    pub suite: Option<TestSuite>,
    pub test_case: Option<TestCase>,
    pub tests_code: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub steps: Vec<Step>,
    pub problems: Vec<Problem>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub analysis: DebugAnalysis,
    pub attempts: Vec<ExecutionAttempt>,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
    pub source_loading_status: BTreeMap<String, LoadStatus>,
}

/// Project a finished run onto the UI view. Pure.
pub fn build_payload(outcome: &RepairOutcome) -> UiPayload {
    let trace = outcome
        .response
        .as_ref()
        .map(|r| r.trace.clone())
        .unwrap_or_default();
    let incorrect: HashMap<&str, &str> = outcome
        .analysis
        .assessments
        .iter()
        .filter(|v| !v.correct)
        .map(|v| (v.block_id.as_str(), v.explanation.as_str()))
        .collect();
    let code_by_file: HashMap<&str, &str> = outcome
        .sources
        .iter()
        .map(|s| (s.file_path.as_str(), s.code.as_str()))
        .collect();

    let steps = build_steps(&trace, &incorrect);
    let problems = build_problems(&outcome.blocks, &steps, &incorrect);
    let nodes = build_nodes(&outcome.blocks, &trace, &incorrect, &code_by_file);
    let edges = build_edges(&outcome.blocks);

    let errors = outcome
        .attempts
        .last()
        .map(|a| a.errors.clone())
        .unwrap_or_default();
    let mut warnings = outcome.warnings.clone();
    if let Some(response) = &outcome.response {
        warnings.extend(trace_warnings(response));
    }

    UiPayload {
        run_id: Uuid::new_v4(),
        succeeded: outcome.succeeded(),
        suite: outcome.suite.clone(),
        test_case: outcome.test_case.clone(),
        tests_code: outcome.tests_code.clone(),
        trace,
        steps,
        problems,
        nodes,
        edges,
        analysis: outcome.analysis.clone(),
        attempts: outcome.attempts.clone(),
        errors,
        warnings,
        source_loading_status: loading_status(outcome),
    }
}

fn build_steps(trace: &[TraceEntry], incorrect: &HashMap<&str, &str>) -> Vec<Step> {
    let mut ordered: Vec<&TraceEntry> = trace.iter().collect();
    ordered.sort_by_key(|e| e.step_index);

    let mut previous = Map::new();
    ordered
        .into_iter()
        .map(|entry| {
            let status = if incorrect.contains_key(entry.block_id.as_str()) {
                StepStatus::Fail
            } else {
                StepStatus::Pass
            };
            Step {
                step_index: entry.step_index,
                block_id: entry.block_id.clone(),
                file_path: entry.file_path.clone(),
                line_no: entry.line_no,
                before: std::mem::replace(&mut previous, entry.locals.clone()),
                after: entry.locals.clone(),
                status,
            }
        })
        .collect()
}

fn build_problems(
    blocks: &[BasicBlock],
    steps: &[Step],
    incorrect: &HashMap<&str, &str>,
) -> Vec<Problem> {
    blocks
        .iter()
        .filter_map(|block| {
            let explanation = incorrect.get(block.block_id.as_str())?;
            let first_failing_step = steps
                .iter()
                .find(|s| s.block_id == block.block_id)
                .map(|s| s.step_index);
            Some(Problem {
                block_id: block.block_id.clone(),
                file_path: block.file_path.clone(),
                start_line: block.start_line,
                end_line: block.end_line,
                explanation: explanation.to_string(),
                first_failing_step,
            })
        })
        .collect()
}

fn build_nodes(
    blocks: &[BasicBlock],
    trace: &[TraceEntry],
    incorrect: &HashMap<&str, &str>,
    code_by_file: &HashMap<&str, &str>,
) -> Vec<GraphNode> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in trace {
        *counts.entry(entry.block_id.as_str()).or_default() += 1;
    }
    blocks
        .iter()
        .map(|block| {
            let execution_count = counts.get(block.block_id.as_str()).copied().unwrap_or(0);
            let status = if execution_count == 0 {
                NodeStatus::Unvisited
            } else if incorrect.contains_key(block.block_id.as_str()) {
                NodeStatus::Fail
            } else {
                NodeStatus::Pass
            };
            let code = code_by_file
                .get(block.file_path.as_str())
                .map(|code| code_snippet(code, block.start_line, block.end_line))
                .unwrap_or_default();
            GraphNode {
                id: block.block_id.clone(),
                file_path: block.file_path.clone(),
                start_line: block.start_line,
                end_line: block.end_line,
                code,
                status,
                execution_count,
            }
        })
        .collect()
}

/// Consecutive blocks by start line within each file. Not the real CFG.
fn build_edges(blocks: &[BasicBlock]) -> Vec<GraphEdge> {
    let mut by_file: BTreeMap<&str, Vec<&BasicBlock>> = BTreeMap::new();
    for block in blocks {
        by_file.entry(block.file_path.as_str()).or_default().push(block);
    }
    by_file
        .into_values()
        .flat_map(|mut file_blocks| {
            file_blocks.sort_by_key(|b| (b.start_line, b.end_line));
            file_blocks
                .windows(2)
                .map(|pair| GraphEdge {
                    from: pair[0].block_id.clone(),
                    to: pair[1].block_id.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn trace_warnings(response: &RunnerResponse) -> Vec<String> {
    let Some(diagnostics) = &response.diagnostics else {
        return Vec::new();
    };
    let mut warnings = Vec::new();
    if diagnostics.dropped_matches > 0 {
        warnings.push(format!(
            "Trace budget exhausted after {} steps; {} block exits were not recorded",
            response.trace.len(),
            diagnostics.dropped_matches
        ));
    }
    if !diagnostics.unmatched_samples.is_empty() {
        let samples = diagnostics
            .unmatched_samples
            .iter()
            .map(|(file, line)| format!("{file}:{line}"))
            .collect::<Vec<_>>()
            .join(", ");
        warnings.push(format!("Executed lines outside any registered block: {samples}"));
    }
    warnings
}

fn loading_status(outcome: &RepairOutcome) -> BTreeMap<String, LoadStatus> {
    let failed: HashSet<&str> = outcome
        .response
        .iter()
        .flat_map(|r| r.source_loading_errors.iter())
        .map(|e| e.file_path.as_str())
        .collect();
    outcome
        .sources
        .iter()
        .map(|s| {
            let status = if failed.contains(s.file_path.as_str()) {
                LoadStatus::Failed
            } else {
                LoadStatus::Loaded
            };
            (s.file_path.clone(), status)
        })
        .collect()
}
