use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::types::{
    BlockAssessment, BlockInfo, EnhancedSource, ErrorRecord, FailedTest, RuntimeStateSnapshot,
    TestSuite,
};
use super::{LanguageModel, ReasoningService, prompts};
use crate::errors::ReasoningError;
use crate::source::SourceFile;
use crate::util::{excerpt, extract_json_object};

/// Reply characters quoted when a reply cannot be parsed.
const REPLY_EXCERPT_CHARS: usize = 200;

/// A [`ReasoningService`] that prompts a [`LanguageModel`] and parses the
/// JSON object in each reply.
pub struct PromptedReasoner<M> {
    model: M,
}

#[derive(Deserialize)]
struct AssessmentReply {
    #[serde(default)]
    assessments: Vec<BlockAssessment>,
}

impl<M: LanguageModel> PromptedReasoner<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, ReasoningError> {
        let reply = self.model.complete(prompt).await?;
        parse_reply(&reply)
    }
}

/// Deserialize the first JSON object found in a model reply.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, ReasoningError> {
    let json = extract_json_object(reply).ok_or_else(|| {
        ReasoningError::MalformedOutput(format!(
            "no JSON object in reply: {}",
            excerpt(reply, REPLY_EXCERPT_CHARS)
        ))
    })?;
    serde_json::from_str(json).map_err(|e| {
        ReasoningError::MalformedOutput(format!("{e}: {}", excerpt(json, REPLY_EXCERPT_CHARS)))
    })
}

#[async_trait]
impl<M: LanguageModel> ReasoningService for PromptedReasoner<M> {
    async fn generate_tests(&self, code: &str) -> Result<TestSuite, ReasoningError> {
        let suite: TestSuite = self.ask(&prompts::test_generation(code)).await?;
        tracing::debug!(target_name = %suite.target, tests = suite.tests.len(), "test suite generated");
        Ok(suite)
    }

    async fn enhance_sources(
        &self,
        sources: &[SourceFile],
        error_context: Option<&[ErrorRecord]>,
    ) -> Result<Vec<EnhancedSource>, ReasoningError> {
        let errors = error_context.unwrap_or(&[]);
        let requests = sources.iter().map(|source| async move {
            let relevant = prompts::errors_for_file(&source.file_path, errors);
            let mut enhanced: EnhancedSource =
                self.ask(&prompts::enhancement(source, &relevant)).await?;
            if enhanced.file_path != source.file_path {
                tracing::debug!(
                    expected = %source.file_path,
                    returned = %enhanced.file_path,
                    "enhancement reply renamed the file; keeping the original path"
                );
                enhanced.file_path = source.file_path.clone();
            }
            Ok(enhanced)
        });
        let results = join_all(requests).await;
        if results.iter().all(Result::is_err) {
            // Nothing came back; let the caller decide how to fall back.
            return results.into_iter().collect();
        }
        Ok(results
            .into_iter()
            .zip(sources)
            .map(|(result, source)| {
                result.unwrap_or_else(|e| {
                    tracing::warn!(file = %source.file_path, error = %e, "enhancement failed for one file");
                    EnhancedSource::unchanged(
                        source,
                        format!("Enhancement failed: {e}. Using original code."),
                    )
                })
            })
            .collect())
    }

    async fn assess_blocks(
        &self,
        task: &str,
        blocks: &[BlockInfo],
        runtime_states: &[RuntimeStateSnapshot],
        failed_test: &FailedTest,
    ) -> Result<Vec<BlockAssessment>, ReasoningError> {
        if blocks.len() != runtime_states.len() {
            return Err(ReasoningError::Other(anyhow::anyhow!(
                "blocks and runtime states must pair up (got {} vs {})",
                blocks.len(),
                runtime_states.len()
            )));
        }
        if blocks.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = prompts::assessment(task, blocks, runtime_states, failed_test);
        let reply: AssessmentReply = self.ask(&prompt).await?;
        Ok(reply.assessments)
    }
}
