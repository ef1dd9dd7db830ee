//! Prompt construction for the model-backed reasoning service.

use serde_json::{Map, Value};

use super::types::{BlockInfo, ErrorRecord, FailedTest, RuntimeStateSnapshot};
use crate::source::SourceFile;

/// Traceback characters kept per error record.
const TRACEBACK_CHARS: usize = 500;

const JSON_ONLY: &str = "Reply with a single JSON object and nothing else.";

pub const TEST_GENERATION_TEMPLATE: &str = r#"You are writing tests for the Python code below. Infer realistic inputs and expected results from the code itself; do not assume a domain.

Code under test:
```python
{code}
```

Cover the normal path first, then edge cases (empty inputs, boundaries, error paths).

Each test is plain Python executed top to bottom in a namespace where every function and class from the code is already defined:
- "input" prepares the arguments, calls the target and assigns the outcome to `result`
- "expected_output" holds `assert` statements about `result`
- "mock_setup" (optional) replaces network, file or clock access before "input" runs
Do not import the code under test and do not use pytest fixtures.

OUTPUT FORMAT (JSON):
{
  "target": "name of the function or class under test",
  "summary": "one sentence on what the suite covers",
  "tests": [
    {
      "name": "short_snake_case_name",
      "description": "behavior this test checks",
      "input": "result = target(...)",
      "expected_output": "assert result == ...",
      "mock_setup": null,
      "notes": null
    }
  ]
}"#;

pub const ENHANCEMENT_TEMPLATE: &str = r#"Make the Python file below self-contained so it executes on its own.

File: {file_path}
```python
{code}
```
{errors}
Rules:
- Add the smallest set of imports, stub classes, enums, constants or functions that the code references but does not define
- Anything outside the standard library must be stubbed, not imported
- Replace network calls and other blocking external access with a mock and mark it with a short comment such as `# mocked dependency`
- `app`, `Depends`, `Request`, `Flask` and `Blueprint` are already provided; do not redefine them
- Keep the original functions, their names and their line order intact

OUTPUT FORMAT (JSON):
{
  "file_path": "{file_path}",
  "code": "the complete file after your changes",
  "added_imports": ["each import or stub you added"],
  "reasoning": "one or two sentences on what you changed"
}"#;

pub fn test_generation(code: &str) -> String {
    format!(
        "{}\n\n{JSON_ONLY}",
        TEST_GENERATION_TEMPLATE.replace("{code}", code.trim())
    )
}

/// Errors relevant to `file_path`: its own, or every error when none are its own.
pub fn errors_for_file<'a>(file_path: &str, errors: &'a [ErrorRecord]) -> Vec<&'a ErrorRecord> {
    let own: Vec<&ErrorRecord> = errors
        .iter()
        .filter(|err| err.file_path.as_deref() == Some(file_path))
        .collect();
    if own.is_empty() {
        errors.iter().collect()
    } else {
        own
    }
}

pub fn enhancement(source: &SourceFile, errors: &[&ErrorRecord]) -> String {
    let error_section = if errors.is_empty() {
        String::new()
    } else {
        let details: Vec<String> = errors
            .iter()
            .map(|err| {
                let traceback = err
                    .traceback
                    .as_deref()
                    .map(|tb| tb.chars().take(TRACEBACK_CHARS).collect::<String>())
                    .unwrap_or_else(|| "N/A".to_string());
                format!(
                    "Error type: {}\nMessage: {}\nFile: {}\nTraceback:\n{}",
                    err.error_type,
                    err.message,
                    err.file_path.as_deref().unwrap_or(&source.file_path),
                    traceback
                )
            })
            .collect();
        format!(
            "\nThe previous run failed with these errors. Fix them specifically:\n\n{}\n",
            details.join("\n\n")
        )
    };

    let prompt = ENHANCEMENT_TEMPLATE
        .replace("{file_path}", &source.file_path)
        .replace("{errors}", &error_section)
        .replace("{code}", source.code.trim());
    format!("{prompt}\n\n{JSON_ONLY}")
}

/// Label of the block at position `index` in an assessment prompt.
pub fn block_label(index: usize) -> String {
    format!("BLOCK-{index}")
}

fn format_vars(values: &Map<String, Value>) -> String {
    if values.is_empty() {
        return "(none)".to_string();
    }
    let mut names: Vec<&String> = values.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("{name}={}", values[name]))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the block-by-block assessment prompt. `blocks` and `states` are
/// paired by position.
pub fn assessment(
    task: &str,
    blocks: &[BlockInfo],
    states: &[RuntimeStateSnapshot],
    failed_test: &FailedTest,
) -> String {
    let mut lines = vec![
        "You are a precise Python debugger.".to_string(),
        String::new(),
        "The code was run against this test:".to_string(),
        format!("Name: {}", failed_test.name.as_deref().unwrap_or("unnamed")),
        format!("Input: {}", failed_test.input),
        format!("Expected: {}", failed_test.expected),
        format!("Actual: {}", failed_test.actual),
    ];
    if let Some(notes) = &failed_test.notes {
        lines.push(format!("Notes: {notes}"));
    }
    lines.push(String::new());
    lines.push(format!("Task: {task}"));
    lines.push(String::new());
    lines.push(
        "Below is the execution trace, one block at a time. Decide for EACH block whether it behaves correctly for the task."
            .to_string(),
    );

    for (index, (block, state)) in blocks.iter().zip(states).enumerate() {
        lines.push(String::new());
        lines.push(format!(
            "[{}] {} ({}:{}-{})",
            block_label(index),
            block.id,
            block.file_path,
            block.start_line,
            block.end_line
        ));
        lines.push(format!("# Before: {}", format_vars(&state.before)));
        lines.push(block.code.trim_end().to_string());
        lines.push(format!("# After: {}", format_vars(&state.after)));
    }

    lines.push(String::new());
    lines.push("OUTPUT FORMAT (JSON):".to_string());
    lines.push(
        r#"{"assessments": [{"block_label": "BLOCK-0", "correct": true, "explanation": "why"}]}"#
            .to_string(),
    );
    lines.push(String::new());
    lines.push(JSON_ONLY.to_string());
    lines.join("\n")
}
