//! Mock text generator for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::services::{GenerationOutput, PromptInputs, ServiceError, TextGenerationService};

/// Mock implementation of [`TextGenerationService`].
///
/// Returns a fixed summary, records every prompt, and can be made slow or
/// made to fail.
pub struct MockTextGenerator {
    summary: Arc<RwLock<String>>,
    errors: Arc<RwLock<VecDeque<ServiceError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    prompts: Arc<RwLock<Vec<PromptInputs>>>,
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            summary: Arc::new(RwLock::new("# Minutes\n\nNothing was decided.\n".to_string())),
            errors: Arc::new(RwLock::new(VecDeque::new())),
            delay: Arc::new(RwLock::new(None)),
            prompts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_summary(&self, summary: impl Into<String>) {
        *self.summary.write().await = summary.into();
    }

    /// Queue an error for the next invocation.
    pub async fn push_error(&self, error: ServiceError) {
        self.errors.write().await.push_back(error);
    }

    /// Sleep this long inside every invocation.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Prompts received so far.
    pub async fn recorded_prompts(&self) -> Vec<PromptInputs> {
        self.prompts.read().await.clone()
    }

    pub async fn invocation_count(&self) -> usize {
        self.prompts.read().await.len()
    }
}

#[async_trait]
impl TextGenerationService for MockTextGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, inputs: PromptInputs) -> Result<GenerationOutput, ServiceError> {
        self.prompts.write().await.push(inputs);

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.errors.write().await.pop_front() {
            return Err(error);
        }

        Ok(GenerationOutput {
            summary_text: self.summary.read().await.clone(),
            model: "mock-model".to_string(),
        })
    }
}
