//! Data exchanged with the reasoning service.
//!
//! Field aliases accept the older spellings replies sometimes use
//! (`target_function`, `enhanced_code`, `block`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sandbox::{SourceLoadError, TestError};
use crate::source::SourceFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Code that prepares inputs and calls the target.
    #[serde(default)]
    pub input: String,
    /// Assertions that must hold afterwards.
    #[serde(default)]
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_setup: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(alias = "target_function")]
    pub target: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedSource {
    pub file_path: String,
    #[serde(alias = "enhanced_code")]
    pub code: String,
    #[serde(default)]
    pub added_imports: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl EnhancedSource {
    /// The source as-is, with `reasoning` explaining why.
    pub fn unchanged(source: &SourceFile, reasoning: impl Into<String>) -> Self {
        Self {
            file_path: source.file_path.clone(),
            code: source.code.clone(),
            added_imports: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn to_source(&self) -> SourceFile {
        SourceFile::new(self.file_path.clone(), self.code.clone())
    }
}

/// Static view of one block as shown to the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub id: String,
    pub code: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Locals just before and just after a block's first execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStateSnapshot {
    pub block_id: String,
    #[serde(default)]
    pub before: Map<String, Value>,
    #[serde(default)]
    pub after: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTest {
    #[serde(default)]
    pub name: Option<String>,
    pub input: String,
    pub expected: String,
    pub actual: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAssessment {
    /// Ordinal label, `BLOCK-n`, in submission order.
    #[serde(alias = "block")]
    pub block_label: String,
    pub correct: bool,
    #[serde(default)]
    pub explanation: String,
}

/// A code-level failure carried into the next enhancement round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl From<&SourceLoadError> for ErrorRecord {
    fn from(err: &SourceLoadError) -> Self {
        Self {
            file_path: Some(err.file_path.clone()),
            error_type: err.error_type.as_str().to_string(),
            message: err.message.clone(),
            traceback: err.traceback.clone(),
        }
    }
}

impl From<&TestError> for ErrorRecord {
    fn from(err: &TestError) -> Self {
        Self {
            file_path: None,
            error_type: err.error_type.as_str().to_string(),
            message: err.message.clone(),
            traceback: err.traceback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{LoadErrorKind, TestErrorKind};
    use serde_json::json;

    #[test]
    fn test_suite_accepts_target_function_alias() {
        let suite: TestSuite = serde_json::from_value(json!({
            "target_function": "average",
            "summary": "basic",
            "tests": [{"name": "t", "input": "result = average([1])", "expected_output": "assert result == 1"}]
        }))
        .unwrap();
        assert_eq!(suite.target, "average");
        assert_eq!(suite.tests[0].description, "");
        assert!(suite.tests[0].mock_setup.is_none());
    }

    #[test]
    fn test_enhanced_source_accepts_enhanced_code_alias() {
        let enhanced: EnhancedSource = serde_json::from_value(json!({
            "file_path": "a.py",
            "enhanced_code": "import os\nx = 1\n",
            "added_imports": ["os"],
            "reasoning": "added import"
        }))
        .unwrap();
        assert_eq!(enhanced.to_source(), SourceFile::new("a.py", "import os\nx = 1\n"));
    }

    #[test]
    fn test_assessment_accepts_block_alias() {
        let assessment: BlockAssessment = serde_json::from_value(json!({
            "block": "BLOCK-2", "correct": false, "explanation": "off by one"
        }))
        .unwrap();
        assert_eq!(assessment.block_label, "BLOCK-2");
        assert!(!assessment.correct);
    }

    #[test]
    fn test_error_records_from_runner_errors() {
        let load = SourceLoadError {
            file_path: "a.py".into(),
            error_type: LoadErrorKind::NameError,
            message: "NameError: name 'x' is not defined".into(),
            line: None,
            traceback: Some("tb".into()),
        };
        let record = ErrorRecord::from(&load);
        assert_eq!(record.file_path.as_deref(), Some("a.py"));
        assert_eq!(record.error_type, "name_error");

        let test = TestError {
            error_type: TestErrorKind::TestExecutionError,
            message: "ZeroDivisionError: division by zero".into(),
            traceback: None,
        };
        let record = ErrorRecord::from(&test);
        assert!(record.file_path.is_none());
        assert_eq!(record.error_type, "test_execution_error");
    }
}
