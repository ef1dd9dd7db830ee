//! The reasoning service: test generation, source enhancement and block
//! assessment.
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `types`    | Data exchanged with the service                      |
//! | `prompts`  | Prompt text for model-backed implementations         |
//! | `prompted` | `PromptedReasoner`: service on top of a model        |
//! | `backends` | `CommandModel` (CLI) and `HttpModel` (chat endpoint) |
//! | `retry`    | Exponential backoff and `RetryingReasoner`           |

pub mod backends;
pub mod prompted;
pub mod prompts;
pub mod retry;
pub mod types;

use async_trait::async_trait;

use crate::errors::ReasoningError;
use crate::source::SourceFile;

pub use backends::{CommandModel, HttpModel, model_from_settings};
pub use prompted::PromptedReasoner;
pub use retry::{RetryPolicy, RetryingReasoner, with_backoff};
pub use types::{
    BlockAssessment, BlockInfo, EnhancedSource, ErrorRecord, FailedTest, RuntimeStateSnapshot,
    TestCase, TestSuite,
};

/// Everything the repair loop needs from natural-language reasoning.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Propose a suite of tests for `code`.
    async fn generate_tests(&self, code: &str) -> Result<TestSuite, ReasoningError>;

    /// Rewrite each source so it executes standalone, one result per input
    /// file in input order. `error_context` carries the failures of earlier
    /// attempts. A file whose rewrite fails comes back unchanged; `Err`
    /// means no file could be rewritten.
    async fn enhance_sources(
        &self,
        sources: &[SourceFile],
        error_context: Option<&[ErrorRecord]>,
    ) -> Result<Vec<EnhancedSource>, ReasoningError>;

    /// Judge each block, labelled `BLOCK-n` by position in `blocks`.
    async fn assess_blocks(
        &self,
        task: &str,
        blocks: &[BlockInfo],
        runtime_states: &[RuntimeStateSnapshot],
        failed_test: &FailedTest,
    ) -> Result<Vec<BlockAssessment>, ReasoningError>;
}

/// A text-in, text-out model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError>;
}

#[async_trait]
impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        (**self).complete(prompt).await
    }
}
