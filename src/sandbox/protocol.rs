//! JSON wire format between the parent and the sandbox child.

use serde::{Deserialize, Serialize};

use crate::source::SourceFile;
use crate::trace::{BasicBlock, TraceDiagnostics, TraceEntry};

/// Filename test code is compiled under inside the child.
pub const TESTS_FILENAME: &str = "debug_session/tests.py";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRequest {
    pub sources: Vec<SourceFile>,
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
    pub tests: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

impl RunnerRequest {
    pub fn new(sources: Vec<SourceFile>, blocks: Vec<BasicBlock>, tests: impl Into<String>) -> Self {
        Self {
            sources,
            blocks,
            tests: tests.into(),
            max_steps: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Why a source file failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    SyntaxError,
    NameError,
    /// An unresolved name that matches a known web-framework symbol.
    DecoratorFrameworkError,
    ImportError,
    ExecutionError,
    ModuleSetupError,
}

impl LoadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadErrorKind::SyntaxError => "syntax_error",
            LoadErrorKind::NameError => "name_error",
            LoadErrorKind::DecoratorFrameworkError => "decorator_framework_error",
            LoadErrorKind::ImportError => "import_error",
            LoadErrorKind::ExecutionError => "execution_error",
            LoadErrorKind::ModuleSetupError => "module_setup_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLoadError {
    pub file_path: String,
    pub error_type: LoadErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// How the test code itself ended, when it did not end cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestErrorKind {
    /// The test ran and an expectation was unmet.
    AssertionFailure,
    TestNameError,
    TestSyntaxError,
    TestExecutionError,
}

impl TestErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestErrorKind::AssertionFailure => "assertion_failure",
            TestErrorKind::TestNameError => "test_name_error",
            TestErrorKind::TestSyntaxError => "test_syntax_error",
            TestErrorKind::TestExecutionError => "test_execution_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub error_type: TestErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources_loaded: usize,
    pub sources_failed: usize,
    pub trace_entries: usize,
    pub has_error: bool,
    pub has_source_loading_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerResponse {
    pub ok: bool,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
    /// Terminal error raised by the test code (never an assertion failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_loading_errors: Vec<SourceLoadError>,
    /// Set when the test ran and an assertion failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_execution_error: Option<TestError>,
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<TraceDiagnostics>,
}

impl RunnerResponse {
    /// Assemble a response, deriving `ok` and the summary from the parts.
    pub fn assemble(
        sources_total: usize,
        trace: Vec<TraceEntry>,
        source_loading_errors: Vec<SourceLoadError>,
        outcome: Option<TestError>,
        diagnostics: Option<TraceDiagnostics>,
    ) -> Self {
        let (error, test_execution_error) = match outcome {
            Some(e) if e.error_type == TestErrorKind::AssertionFailure => (None, Some(e)),
            other => (other, None),
        };
        let sources_failed = source_loading_errors.len();
        let summary = RunSummary {
            sources_loaded: sources_total.saturating_sub(sources_failed),
            sources_failed,
            trace_entries: trace.len(),
            has_error: error.is_some(),
            has_source_loading_errors: sources_failed > 0,
        };
        Self {
            ok: error.is_none() && source_loading_errors.is_empty(),
            trace,
            error,
            source_loading_errors,
            test_execution_error,
            summary,
            diagnostics,
        }
    }

    /// True when every file loaded and the test raised nothing but (at most)
    /// an assertion failure.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.source_loading_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = RunnerRequest::new(
            vec![SourceFile::new("a.py", "x = 1")],
            vec![BasicBlock {
                block_id: "b1".into(),
                file_path: "a.py".into(),
                start_line: 1,
                end_line: 1,
            }],
            "assert x == 1",
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sources"][0]["file_path"], "a.py");
        assert_eq!(value["blocks"][0]["end_line"], 1);
        assert!(value.get("max_steps").is_none());
        let value = serde_json::to_value(request.with_max_steps(7)).unwrap();
        assert_eq!(value["max_steps"], 7);
    }

    #[test]
    fn test_assertion_failure_is_not_an_error() {
        let response = RunnerResponse::assemble(
            2,
            Vec::new(),
            Vec::new(),
            Some(TestError {
                error_type: TestErrorKind::AssertionFailure,
                message: "expected 0".into(),
                traceback: None,
            }),
            None,
        );
        assert!(response.ok);
        assert!(response.is_clean());
        assert!(response.error.is_none());
        assert!(response.test_execution_error.is_some());
        assert_eq!(response.summary.sources_loaded, 2);
        assert!(!response.summary.has_error);
    }

    #[test]
    fn test_load_errors_make_response_not_ok() {
        let response = RunnerResponse::assemble(
            2,
            Vec::new(),
            vec![SourceLoadError {
                file_path: "bad.py".into(),
                error_type: LoadErrorKind::SyntaxError,
                message: "Syntax error at line 1: invalid syntax".into(),
                line: Some(1),
                traceback: None,
            }],
            None,
            None,
        );
        assert!(!response.ok);
        assert_eq!(response.summary.sources_loaded, 1);
        assert_eq!(response.summary.sources_failed, 1);
        assert!(response.summary.has_source_loading_errors);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["source_loading_errors"][0]["error_type"], "syntax_error");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_response_parses_minimal_child_output() {
        let value = json!({
            "ok": false,
            "trace": [],
            "error": {"error_type": "test_name_error", "message": "name 'f' is not defined"},
            "summary": {
                "sources_loaded": 1, "sources_failed": 0, "trace_entries": 0,
                "has_error": true, "has_source_loading_errors": false
            }
        });
        let response: RunnerResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.error.unwrap().error_type, TestErrorKind::TestNameError);
        assert!(response.source_loading_errors.is_empty());
    }
}
