use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;
use crate::reasoning::{EnhancedSource, ErrorRecord};
use crate::sandbox::RunnerResponse;

/// Error type recorded for attempts lost to the sandbox itself.
pub const INFRASTRUCTURE_ERROR: &str = "infrastructure_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Error,
}

/// One pass through enhance-then-execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 1-based.
    pub attempt: u32,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// Exactly the sources this attempt executed.
    pub sources: Vec<EnhancedSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub trace_entries: usize,
    /// Lost to a timeout or a broken child rather than to the code.
    #[serde(default)]
    pub infrastructure_failure: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionAttempt {
    pub fn from_response(
        attempt: u32,
        sources: Vec<EnhancedSource>,
        response: &RunnerResponse,
    ) -> Self {
        let mut errors: Vec<ErrorRecord> = response
            .source_loading_errors
            .iter()
            .map(ErrorRecord::from)
            .collect();
        errors.extend(response.error.iter().map(ErrorRecord::from));

        let status = if response.is_clean() {
            AttemptStatus::Success
        } else {
            AttemptStatus::Error
        };
        let error_summary = match status {
            AttemptStatus::Success => None,
            AttemptStatus::Error => Some(summarize(&errors)),
        };
        Self {
            attempt,
            status,
            error_summary,
            errors,
            sources,
            reasoning: None,
            trace_entries: response.trace.len(),
            infrastructure_failure: false,
            recorded_at: Utc::now(),
        }
    }

    pub fn infrastructure(attempt: u32, sources: Vec<EnhancedSource>, err: &SandboxError) -> Self {
        let message = err.to_string();
        Self {
            attempt,
            status: AttemptStatus::Error,
            error_summary: Some(message.clone()),
            errors: vec![ErrorRecord {
                file_path: None,
                error_type: INFRASTRUCTURE_ERROR.to_string(),
                message,
                traceback: None,
            }],
            sources,
            reasoning: None,
            trace_entries: 0,
            infrastructure_failure: true,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

fn summarize(errors: &[ErrorRecord]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| match &e.file_path {
            Some(path) => format!("{path}: {}: {}", e.error_type, e.message),
            None => format!("{}: {}", e.error_type, e.message),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Append-only record of attempts.
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    attempts: Vec<ExecutionAttempt>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, attempt: ExecutionAttempt) {
        self.attempts.push(attempt);
    }

    /// Set the reasoning of the final attempt. Only a successful final
    /// attempt can take it; returns whether it did.
    pub fn attach_success_reasoning(&mut self, reasoning: impl Into<String>) -> bool {
        match self.attempts.last_mut() {
            Some(last) if last.succeeded() => {
                last.reasoning = Some(reasoning.into());
                true
            }
            _ => false,
        }
    }

    /// Every code-level error so far, oldest first. Infrastructure failures
    /// are left out.
    pub fn code_errors(&self) -> Vec<ErrorRecord> {
        self.attempts
            .iter()
            .filter(|a| !a.infrastructure_failure)
            .flat_map(|a| a.errors.iter().cloned())
            .collect()
    }

    pub fn last(&self) -> Option<&ExecutionAttempt> {
        self.attempts.last()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn into_vec(self) -> Vec<ExecutionAttempt> {
        self.attempts
    }
}
