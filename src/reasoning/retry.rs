//! Exponential backoff for transient reasoning failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::ReasoningService;
use super::types::{
    BlockAssessment, BlockInfo, EnhancedSource, ErrorRecord, FailedTest, RuntimeStateSnapshot,
    TestSuite,
};
use crate::config::RetrySettings;
use crate::errors::ReasoningError;
use crate::source::SourceFile;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry), capped at
    /// `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or the policy is spent.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ReasoningError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReasoningError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient reasoning failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Decorates a service so every call is retried under `policy`.
pub struct RetryingReasoner<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ReasoningService> RetryingReasoner<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: ReasoningService> ReasoningService for RetryingReasoner<S> {
    async fn generate_tests(&self, code: &str) -> Result<TestSuite, ReasoningError> {
        with_backoff(&self.policy, "generate_tests", || self.inner.generate_tests(code)).await
    }

    async fn enhance_sources(
        &self,
        sources: &[SourceFile],
        error_context: Option<&[ErrorRecord]>,
    ) -> Result<Vec<EnhancedSource>, ReasoningError> {
        with_backoff(&self.policy, "enhance_sources", || {
            self.inner.enhance_sources(sources, error_context)
        })
        .await
    }

    async fn assess_blocks(
        &self,
        task: &str,
        blocks: &[BlockInfo],
        runtime_states: &[RuntimeStateSnapshot],
        failed_test: &FailedTest,
    ) -> Result<Vec<BlockAssessment>, ReasoningError> {
        with_backoff(&self.policy, "assess_blocks", || {
            self.inner
                .assess_blocks(task, blocks, runtime_states, failed_test)
        })
        .await
    }
}
