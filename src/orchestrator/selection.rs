//! Picking one generated test case and rendering it as executable code.

use std::sync::LazyLock;

use regex::Regex;

use crate::cfg::parse::has_syntax_errors;
use crate::reasoning::{TestCase, TestSuite};

static ASSIGNS_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*result\s*=[^=]").unwrap());
static ASSERTS_ON_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*assert\b.*\bresult\b").unwrap());

/// True when the case both assigns `result` and asserts on it.
pub fn checks_result(case: &TestCase) -> bool {
    let body = format!("{}\n{}", case.input, case.expected_output);
    ASSIGNS_RESULT.is_match(&body) && ASSERTS_ON_RESULT.is_match(&body)
}

/// Preference order: a case that checks `result`, then the first case whose
/// rendering parses, then the first case.
pub fn select_test_case(suite: &TestSuite) -> Option<&TestCase> {
    suite
        .tests
        .iter()
        .find(|case| checks_result(case))
        .or_else(|| {
            suite
                .tests
                .iter()
                .find(|case| !has_syntax_errors(&render_test_case(case, suite)))
        })
        .or_else(|| suite.tests.first())
}

fn clean(part: &str) -> &str {
    part.trim_start_matches(['\n', '\r']).trim_end()
}

/// Header comments, mock setup, input and assertions, blank-line separated.
pub fn render_test_case(case: &TestCase, suite: &TestSuite) -> String {
    let header = format!(
        "# Generated test: {}\n# Target: {}\n# Description: {}",
        case.name,
        suite.target,
        case.description.replace('\n', " ")
    );
    [
        Some(header.as_str()),
        case.mock_setup.as_deref(),
        Some(case.input.as_str()),
        Some(case.expected_output.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(clean)
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("\n\n")
}
