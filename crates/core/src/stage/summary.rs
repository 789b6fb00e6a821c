//! Summary generation stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::job::Stage;
use crate::services::{PromptInputs, ServiceError, TextGenerationService};

use super::types::{PollOutcome, StageContext, StageOutput, StageService, StageStart};

/// Prompt assembled from the transcript, the sentiment result and the
/// source key.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    system: Option<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, system: Option<String>) -> Self {
        Self {
            template: template.into(),
            system,
        }
    }

    /// Substitute `{transcript}`, `{sentiment}` and `{source_key}`.
    /// Substituted text is not scanned again, and unknown `{...}` sequences
    /// are left alone.
    pub fn render(&self, transcript: &str, sentiment: &str, source_key: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + transcript.len() + sentiment.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let value = [
                ("{transcript}", transcript),
                ("{sentiment}", sentiment),
                ("{source_key}", source_key),
            ]
            .into_iter()
            .find(|(name, _)| tail.starts_with(name));

            match value {
                Some((name, value)) => {
                    out.push_str(value);
                    rest = &tail[name.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Calls the text-generation service once with the rendered prompt.
pub struct SummaryStage {
    generator: Arc<dyn TextGenerationService>,
    prompt: PromptTemplate,
}

impl SummaryStage {
    pub fn new(generator: Arc<dyn TextGenerationService>, prompt: PromptTemplate) -> Self {
        Self { generator, prompt }
    }
}

#[async_trait]
impl StageService for SummaryStage {
    async fn start(&self, ctx: &StageContext<'_>) -> Result<StageStart, ServiceError> {
        let transcript_key = ctx.input_key(Stage::Summary)?;
        let sentiment_key = ctx.job.sentiment_key.as_deref().ok_or_else(|| {
            ServiceError::Permanent(format!("sentiment result missing from job {}", ctx.job.job_id))
        })?;

        let transcript = ctx.read_text(transcript_key).await?;
        let sentiment = ctx.read_text(sentiment_key).await?;

        let inputs = PromptInputs {
            job_id: ctx.job.job_id.clone(),
            prompt: self
                .prompt
                .render(&transcript, &sentiment, &ctx.job.source_key),
            system: self.prompt.system.clone(),
        };

        let output = self.generator.invoke(inputs).await?;
        debug!(job_id = %ctx.job.job_id, model = %output.model, chars = output.summary_text.len(), "Summary generated");

        Ok(StageStart::Completed(StageOutput::Inline(
            output.summary_text.into_bytes(),
        )))
    }

    async fn poll(&self, _handle: &str) -> Result<PollOutcome, ServiceError> {
        Err(ServiceError::Permanent(
            "summary stage has no external job to poll".to_string(),
        ))
    }

    fn finalize(&self, raw: Vec<u8>) -> Result<Vec<u8>, ServiceError> {
        Ok(raw)
    }
}
