//! The bounded enhance → execute → classify loop.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::attempt::{AttemptHistory, ExecutionAttempt};
use super::selection::{render_test_case, select_test_case};
use super::snapshots::{
    BlockVerdict, block_infos, pair_with_blocks, resolve_assessments, runtime_snapshots,
};
use crate::cfg::{build_project_blocking, derive_blocks};
use crate::errors::OrchestratorError;
use crate::reasoning::{
    EnhancedSource, ErrorRecord, FailedTest, ReasoningService, TestCase, TestSuite,
};
use crate::sandbox::{RunnerRequest, RunnerResponse, TraceExecutor};
use crate::source::SourceFile;
use crate::trace::BasicBlock;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Failure description used when the test never reached a known block.
pub const NO_BLOCKS_EXECUTED: &str = "Test failed before executing any block";

const NO_ERROR_ACTUAL: &str = "All assertions passed (no error)";

/// What the reasoning service concluded about the traced run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugAnalysis {
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_test: Option<FailedTest>,
    #[serde(default)]
    pub assessments: Vec<BlockVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DebugAnalysis {
    fn failed(task: &str, failed_test: Option<FailedTest>, reason: impl Into<String>) -> Self {
        Self {
            task_description: task.to_string(),
            failed_test,
            assessments: Vec::new(),
            failure_reason: Some(reason.into()),
        }
    }
}

/// Everything a repair run produced, successful or not.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub suite: Option<TestSuite>,
    pub test_case: Option<TestCase>,
    /// The rendered test code that was executed.
    pub tests_code: Option<String>,
    /// Sources of the final attempt (the originals if none ran).
    pub sources: Vec<SourceFile>,
    /// Blocks of the final attempt.
    pub blocks: Vec<BasicBlock>,
    /// Runner response of the final attempt, if the sandbox produced one.
    pub response: Option<RunnerResponse>,
    pub analysis: DebugAnalysis,
    pub attempts: Vec<ExecutionAttempt>,
    pub warnings: Vec<String>,
}

impl RepairOutcome {
    fn without_attempts(
        sources: &[SourceFile],
        blocks: Option<Vec<BasicBlock>>,
        analysis: DebugAnalysis,
    ) -> Self {
        Self {
            suite: None,
            test_case: None,
            tests_code: None,
            sources: sources.to_vec(),
            blocks: blocks.unwrap_or_default(),
            response: None,
            analysis,
            attempts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// True when the final attempt executed cleanly.
    pub fn succeeded(&self) -> bool {
        self.attempts.last().is_some_and(ExecutionAttempt::succeeded)
    }
}

/// Drives test generation, repair attempts and block assessment.
pub struct RepairOrchestrator<R, E> {
    reasoner: R,
    executor: E,
    max_attempts: u32,
}

impl<R: ReasoningService, E: TraceExecutor> RepairOrchestrator<R, E> {
    pub fn new(reasoner: R, executor: E) -> Self {
        Self {
            reasoner,
            executor,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run the full pipeline for `task` over `sources`.
    ///
    /// When `blocks` is `None`, blocks are derived from the sources each
    /// attempt executes. Only missing sources or a broken parser are errors;
    /// every other failure is described in the returned analysis.
    pub async fn run(
        &self,
        task: &str,
        sources: &[SourceFile],
        blocks: Option<Vec<BasicBlock>>,
    ) -> Result<RepairOutcome, OrchestratorError> {
        let Some(first) = sources.first() else {
            return Err(OrchestratorError::NoSources);
        };

        let suite = match self.reasoner.generate_tests(&first.code).await {
            Ok(suite) => suite,
            Err(e) => {
                tracing::warn!(error = %e, "test generation failed");
                let analysis = DebugAnalysis::failed(task, None, format!("Test generation failed: {e}"));
                return Ok(RepairOutcome::without_attempts(sources, blocks, analysis));
            }
        };
        let Some(case) = select_test_case(&suite).cloned() else {
            let analysis = DebugAnalysis::failed(task, None, "Test generation returned no test cases");
            let mut outcome = RepairOutcome::without_attempts(sources, blocks, analysis);
            outcome.suite = Some(suite);
            return Ok(outcome);
        };
        let tests_code = render_test_case(&case, &suite);
        tracing::info!(test = %case.name, target_name = %suite.target, "selected test case");

        let mut history = AttemptHistory::new();
        let mut warnings = Vec::new();
        let mut last_run: Option<(Vec<SourceFile>, Vec<BasicBlock>, Option<RunnerResponse>)> = None;

        for attempt in 1..=self.max_attempts {
            tracing::info!(attempt, max_attempts = self.max_attempts, "starting repair attempt");
            let context = history.code_errors();
            let enhanced = self.enhance(sources, &context, attempt, &mut warnings).await;
            let executed: Vec<SourceFile> = enhanced.iter().map(EnhancedSource::to_source).collect();

            let attempt_blocks = match &blocks {
                Some(blocks) => blocks.clone(),
                None => derive_blocks(&build_project_blocking(executed.clone()).await?),
            };
            let request = RunnerRequest::new(executed.clone(), attempt_blocks.clone(), tests_code.clone());

            match self.executor.execute(&request).await {
                Ok(response) => {
                    let record = ExecutionAttempt::from_response(attempt, enhanced, &response);
                    let clean = record.succeeded();
                    if !clean {
                        tracing::info!(
                            attempt,
                            errors = record.errors.len(),
                            "attempt failed with code errors"
                        );
                    }
                    history.record(record);
                    last_run = Some((executed, attempt_blocks, Some(response)));
                    if clean {
                        tracing::info!(attempt, "attempt executed cleanly");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "sandbox infrastructure failure");
                    warnings.push(format!("Attempt {attempt}: sandbox failure: {e}"));
                    history.record(ExecutionAttempt::infrastructure(attempt, enhanced, &e));
                    last_run = Some((executed, attempt_blocks, None));
                }
            }
        }

        let (executed, run_blocks, response) = last_run.unwrap_or_else(|| {
            (sources.to_vec(), blocks.clone().unwrap_or_default(), None)
        });

        let rationale = history
            .last()
            .filter(|last| last.succeeded())
            .map(|last| success_rationale(last.attempt, &last.sources));

        let analysis = match (rationale, &response) {
            (Some(rationale), Some(response)) => {
                history.attach_success_reasoning(rationale);
                self.analyze(task, &case, &executed, &run_blocks, response).await
            }
            _ => {
                let last_error = history
                    .last()
                    .and_then(|a| a.error_summary.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                let failed_test = failed_test_for(&case, last_error.clone(), None);
                DebugAnalysis::failed(
                    task,
                    Some(failed_test),
                    format!(
                        "All {} attempts failed. Last error: {last_error}",
                        history.len()
                    ),
                )
            }
        };

        Ok(RepairOutcome {
            suite: Some(suite),
            test_case: Some(case),
            tests_code: Some(tests_code),
            sources: executed,
            blocks: run_blocks,
            response,
            analysis,
            attempts: history.into_vec(),
            warnings,
        })
    }

    /// Enhance the original sources, one result per input file. A failed
    /// call falls back to the originals so the attempt still runs.
    async fn enhance(
        &self,
        sources: &[SourceFile],
        context: &[ErrorRecord],
        attempt: u32,
        warnings: &mut Vec<String>,
    ) -> Vec<EnhancedSource> {
        let context = (!context.is_empty()).then_some(context);
        match self.reasoner.enhance_sources(sources, context).await {
            Ok(enhanced) => {
                let mut by_path: HashMap<String, EnhancedSource> = enhanced
                    .into_iter()
                    .map(|e| (e.file_path.clone(), e))
                    .collect();
                sources
                    .iter()
                    .map(|source| {
                        by_path.remove(&source.file_path).unwrap_or_else(|| {
                            EnhancedSource::unchanged(
                                source,
                                "No enhancement returned for this file. Using original code.",
                            )
                        })
                    })
                    .collect()
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "enhancement failed; using original sources");
                warnings.push(format!("Attempt {attempt}: enhancement failed, original code used"));
                let reasoning = format!("Enhancement failed: {e}. Using original code.");
                sources
                    .iter()
                    .map(|source| EnhancedSource::unchanged(source, reasoning.clone()))
                    .collect()
            }
        }
    }

    async fn analyze(
        &self,
        task: &str,
        case: &TestCase,
        sources: &[SourceFile],
        blocks: &[BasicBlock],
        response: &RunnerResponse,
    ) -> DebugAnalysis {
        let (actual, notes) = match &response.test_execution_error {
            Some(e) => (e.message.clone(), e.traceback.clone()),
            None => (NO_ERROR_ACTUAL.to_string(), None),
        };
        let failed_test = failed_test_for(case, actual, notes);

        let infos = block_infos(blocks, sources);
        let (submitted, states) = pair_with_blocks(runtime_snapshots(&response.trace), &infos);
        if submitted.is_empty() {
            tracing::warn!(trace_entries = response.trace.len(), "no known block was executed");
            return DebugAnalysis::failed(task, Some(failed_test), NO_BLOCKS_EXECUTED);
        }

        match self
            .reasoner
            .assess_blocks(task, &submitted, &states, &failed_test)
            .await
        {
            Ok(assessments) => {
                let verdicts = resolve_assessments(&assessments, &submitted);
                tracing::info!(
                    blocks = submitted.len(),
                    incorrect = verdicts.iter().filter(|v| !v.correct).count(),
                    "blocks assessed"
                );
                DebugAnalysis {
                    task_description: task.to_string(),
                    failed_test: Some(failed_test),
                    assessments: verdicts,
                    failure_reason: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "block assessment failed");
                DebugAnalysis::failed(
                    task,
                    Some(failed_test),
                    format!("Block assessment failed: {e}"),
                )
            }
        }
    }
}

fn failed_test_for(case: &TestCase, actual: String, notes: Option<String>) -> FailedTest {
    let input = match &case.mock_setup {
        Some(setup) if !setup.trim().is_empty() => format!("{}\n{}", setup.trim_end(), case.input),
        _ => case.input.clone(),
    };
    FailedTest {
        name: Some(case.name.clone()),
        input,
        expected: case.expected_output.clone(),
        actual,
        notes,
    }
}

fn success_rationale(attempt: u32, sources: &[EnhancedSource]) -> String {
    let mut rationale = if attempt == 1 {
        "Sources executed without load or runtime errors on the first attempt.".to_string()
    } else {
        format!("Sources executed without load or runtime errors after {attempt} attempts.")
    };
    for source in sources.iter().filter(|s| !s.reasoning.trim().is_empty()) {
        rationale.push_str(&format!("\n{}: {}", source.file_path, source.reasoning.trim()));
    }
    rationale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ReasoningError, SandboxError};
    use crate::reasoning::{BlockAssessment, BlockInfo, RuntimeStateSnapshot};
    use crate::sandbox::{LoadErrorKind, SourceLoadError, TestError, TestErrorKind};
    use crate::trace::TraceEntry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const AVERAGE: &str = "def average(xs):\n    total = 0\n    for x in xs:\n        total += x\n    return total / len(xs)\n";

    fn suite() -> TestSuite {
        TestSuite {
            target: "average".into(),
            summary: "averages".into(),
            tests: vec![TestCase {
                name: "empty_list".into(),
                description: "average of nothing is zero".into(),
                input: "result = average([])".into(),
                expected_output: "assert result == 0".into(),
                mock_setup: None,
                notes: None,
            }],
        }
    }

    struct FakeReasoner {
        suite: Result<TestSuite, String>,
        fail_enhancement: bool,
        assessments: Vec<BlockAssessment>,
        contexts: Mutex<Vec<Option<Vec<ErrorRecord>>>>,
        assessed: Mutex<Vec<(Vec<BlockInfo>, Vec<RuntimeStateSnapshot>, FailedTest)>>,
    }

    impl FakeReasoner {
        fn new() -> Self {
            Self {
                suite: Ok(suite()),
                fail_enhancement: false,
                assessments: Vec::new(),
                contexts: Mutex::new(Vec::new()),
                assessed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningService for FakeReasoner {
        async fn generate_tests(&self, _code: &str) -> Result<TestSuite, ReasoningError> {
            self.suite.clone().map_err(ReasoningError::Unavailable)
        }

        async fn enhance_sources(
            &self,
            sources: &[SourceFile],
            error_context: Option<&[ErrorRecord]>,
        ) -> Result<Vec<EnhancedSource>, ReasoningError> {
            self.contexts
                .lock()
                .unwrap()
                .push(error_context.map(<[ErrorRecord]>::to_vec));
            if self.fail_enhancement {
                return Err(ReasoningError::MalformedOutput("not json".into()));
            }
            Ok(sources
                .iter()
                .map(|s| EnhancedSource::unchanged(s, "looks standalone"))
                .collect())
        }

        async fn assess_blocks(
            &self,
            _task: &str,
            blocks: &[BlockInfo],
            runtime_states: &[RuntimeStateSnapshot],
            failed_test: &FailedTest,
        ) -> Result<Vec<BlockAssessment>, ReasoningError> {
            self.assessed.lock().unwrap().push((
                blocks.to_vec(),
                runtime_states.to_vec(),
                failed_test.clone(),
            ));
            Ok(self.assessments.clone())
        }
    }

    struct FakeExecutor {
        responses: Mutex<VecDeque<Result<RunnerResponse, SandboxError>>>,
        requests: Mutex<Vec<RunnerRequest>>,
    }

    impl FakeExecutor {
        fn new(responses: Vec<Result<RunnerResponse, SandboxError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TraceExecutor for FakeExecutor {
        async fn execute(&self, request: &RunnerRequest) -> Result<RunnerResponse, SandboxError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SandboxError::Timeout(Duration::from_secs(1))))
        }
    }

    fn blocks() -> Vec<BasicBlock> {
        [("calc:average:b1", 1, 2), ("calc:average:b2", 3, 4), ("calc:average:b3", 5, 5)]
            .into_iter()
            .map(|(id, start, end)| BasicBlock {
                block_id: id.into(),
                file_path: "calc.py".into(),
                start_line: start,
                end_line: end,
            })
            .collect()
    }

    fn entry(block: &str, step: usize, locals: serde_json::Value) -> TraceEntry {
        TraceEntry {
            block_id: block.into(),
            step_index: step,
            file_path: "calc.py".into(),
            line_no: 1,
            locals: locals.as_object().unwrap().clone(),
        }
    }

    fn zero_division() -> RunnerResponse {
        RunnerResponse::assemble(
            1,
            vec![
                entry("calc:average:b1", 0, json!({"xs": [], "total": 0})),
                entry("calc:average:b3", 1, json!({"xs": [], "total": 0})),
            ],
            Vec::new(),
            Some(TestError {
                error_type: TestErrorKind::TestExecutionError,
                message: "ZeroDivisionError: division by zero".into(),
                traceback: None,
            }),
            None,
        )
    }

    fn assertion_failure(trace: Vec<TraceEntry>) -> RunnerResponse {
        RunnerResponse::assemble(
            1,
            trace,
            Vec::new(),
            Some(TestError {
                error_type: TestErrorKind::AssertionFailure,
                message: "AssertionError: assert result == 0".into(),
                traceback: Some("Traceback ...".into()),
            }),
            None,
        )
    }

    fn load_failure() -> RunnerResponse {
        RunnerResponse::assemble(
            1,
            Vec::new(),
            vec![SourceLoadError {
                file_path: "calc.py".into(),
                error_type: LoadErrorKind::NameError,
                message: "NameError: name 'helper' is not defined".into(),
                line: None,
                traceback: None,
            }],
            None,
            None,
        )
    }

    fn sources() -> Vec<SourceFile> {
        vec![SourceFile::new("calc.py", AVERAGE)]
    }

    #[tokio::test]
    async fn test_no_sources_is_an_error() {
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), FakeExecutor::new(Vec::new()));
        let err = orchestrator.run("t", &[], None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoSources));
    }

    #[tokio::test]
    async fn test_single_clean_attempt_is_assessed() {
        let mut reasoner = FakeReasoner::new();
        reasoner.assessments = vec![BlockAssessment {
            block_label: "BLOCK-1".into(),
            correct: false,
            explanation: "divides by len(xs) without checking for empty input".into(),
        }];
        let trace = vec![
            entry("calc:average:b1", 0, json!({"xs": [2, 4], "total": 0})),
            entry("calc:average:b2", 1, json!({"total": 2, "x": 2})),
            entry("calc:average:b2", 2, json!({"total": 6, "x": 4})),
            entry("calc:average:b3", 3, json!({"total": 6})),
        ];
        let executor = FakeExecutor::new(vec![Ok(assertion_failure(trace))]);
        let orchestrator = RepairOrchestrator::new(reasoner, executor);

        let outcome = orchestrator
            .run("mean of a list", &sources(), Some(blocks()))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].reasoning.as_deref().unwrap().contains("first attempt"));
        assert!(outcome.analysis.failure_reason.is_none());
        assert_eq!(outcome.analysis.assessments.len(), 1);
        assert_eq!(outcome.analysis.assessments[0].block_id, "calc:average:b2");

        let assessed = orchestrator.reasoner.assessed.lock().unwrap();
        let (infos, states, failed_test) = &assessed[0];
        assert_eq!(infos.len(), 3);
        assert_eq!(states[2].before.get("total"), Some(&json!(6)));
        assert_eq!(failed_test.actual, "AssertionError: assert result == 0");
        assert_eq!(failed_test.notes.as_deref(), Some("Traceback ..."));

        let requests = orchestrator.executor.requests.lock().unwrap();
        assert!(requests[0].tests.starts_with("# Generated test: empty_list"));
        assert!(orchestrator.reasoner.contexts.lock().unwrap()[0].is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let executor = FakeExecutor::new((0..5).map(|_| Ok(zero_division())).collect());
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), executor);

        let outcome = orchestrator.run("mean", &sources(), Some(blocks())).await.unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 5);
        assert!(outcome.analysis.assessments.is_empty());
        let reason = outcome.analysis.failure_reason.unwrap();
        assert!(reason.starts_with("All 5 attempts failed. Last error:"));
        assert!(reason.contains("ZeroDivisionError"));
        assert!(orchestrator.reasoner.assessed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errors_accumulate_into_enhancement_context() {
        let executor = FakeExecutor::new(vec![
            Ok(load_failure()),
            Ok(zero_division()),
            Ok(assertion_failure(Vec::new())),
        ]);
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), executor);

        let outcome = orchestrator.run("mean", &sources(), Some(blocks())).await.unwrap();

        assert_eq!(outcome.attempts.len(), 3);
        let contexts = orchestrator.reasoner.contexts.lock().unwrap();
        assert!(contexts[0].is_none());
        assert_eq!(contexts[1].as_ref().unwrap().len(), 1);
        let third = contexts[2].as_ref().unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(third[0].error_type, "name_error");
        assert_eq!(third[1].error_type, "test_execution_error");
    }

    #[tokio::test]
    async fn test_infrastructure_failures_are_not_fed_back() {
        let executor = FakeExecutor::new(vec![
            Err(SandboxError::Timeout(Duration::from_secs(60))),
            Ok(zero_division()),
        ]);
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), executor).with_max_attempts(2);

        let outcome = orchestrator.run("mean", &sources(), Some(blocks())).await.unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].infrastructure_failure);
        assert!(outcome.warnings.iter().any(|w| w.contains("sandbox failure")));
        let contexts = orchestrator.reasoner.contexts.lock().unwrap();
        assert!(contexts[1].is_none());
    }

    #[tokio::test]
    async fn test_enhancement_failure_falls_back_to_originals() {
        let mut reasoner = FakeReasoner::new();
        reasoner.fail_enhancement = true;
        let executor = FakeExecutor::new(vec![Ok(zero_division())]);
        let orchestrator = RepairOrchestrator::new(reasoner, executor).with_max_attempts(1);

        let outcome = orchestrator.run("mean", &sources(), Some(blocks())).await.unwrap();

        let attempt = &outcome.attempts[0];
        assert_eq!(attempt.sources[0].code, AVERAGE);
        assert!(attempt.sources[0].reasoning.starts_with("Enhancement failed:"));
        assert!(outcome.warnings.iter().any(|w| w.contains("enhancement failed")));
        let requests = orchestrator.executor.requests.lock().unwrap();
        assert_eq!(requests[0].sources[0].code, AVERAGE);
    }

    #[tokio::test]
    async fn test_generation_failure_still_returns_outcome() {
        let mut reasoner = FakeReasoner::new();
        reasoner.suite = Err("no credentials".into());
        let orchestrator = RepairOrchestrator::new(reasoner, FakeExecutor::new(Vec::new()));

        let outcome = orchestrator.run("mean", &sources(), None).await.unwrap();

        assert!(outcome.attempts.is_empty());
        assert!(outcome.test_case.is_none());
        let reason = outcome.analysis.failure_reason.unwrap();
        assert!(reason.starts_with("Test generation failed"));
        assert!(orchestrator.executor.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_suite_still_returns_outcome() {
        let mut reasoner = FakeReasoner::new();
        reasoner.suite = Ok(TestSuite {
            target: "average".into(),
            summary: String::new(),
            tests: Vec::new(),
        });
        let orchestrator = RepairOrchestrator::new(reasoner, FakeExecutor::new(Vec::new()));
        let outcome = orchestrator.run("mean", &sources(), None).await.unwrap();
        assert!(outcome.suite.is_some());
        assert_eq!(
            outcome.analysis.failure_reason.as_deref(),
            Some("Test generation returned no test cases")
        );
    }

    #[tokio::test]
    async fn test_clean_run_without_traced_blocks() {
        let executor = FakeExecutor::new(vec![Ok(assertion_failure(vec![entry(
            "unknown:block",
            0,
            json!({}),
        )]))]);
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), executor);

        let outcome = orchestrator.run("mean", &sources(), Some(blocks())).await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.analysis.failure_reason.as_deref(), Some(NO_BLOCKS_EXECUTED));
        assert!(outcome.analysis.assessments.is_empty());
        assert!(outcome.analysis.failed_test.is_some());
        assert!(orchestrator.reasoner.assessed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocks_are_derived_when_not_supplied() {
        let executor = FakeExecutor::new(vec![Ok(assertion_failure(Vec::new()))]);
        let orchestrator = RepairOrchestrator::new(FakeReasoner::new(), executor);

        let outcome = orchestrator.run("mean", &sources(), None).await.unwrap();

        assert!(!outcome.blocks.is_empty());
        assert!(outcome.blocks.iter().all(|b| b.file_path == "calc.py"));
        let requests = orchestrator.executor.requests.lock().unwrap();
        assert_eq!(requests[0].blocks, outcome.blocks);
    }

    #[test]
    fn test_failed_test_includes_mock_setup() {
        let mut case = suite().tests.remove(0);
        case.mock_setup = Some("import time\n".into());
        let failed = failed_test_for(&case, "boom".into(), None);
        assert_eq!(failed.input, "import time\nresult = average([])");
        assert_eq!(failed.name.as_deref(), Some("empty_list"));
    }
}
