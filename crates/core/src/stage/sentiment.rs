//! Sentiment analysis stage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::Stage;
use crate::services::{AsyncJobService, ServiceError};

use super::async_job;
use super::types::{PollOutcome, StageContext, StageService, StageStart};

/// Runs sentiment analysis over the transcript. The service's result
/// document is stored verbatim.
pub struct SentimentStage {
    service: Arc<dyn AsyncJobService>,
}

impl SentimentStage {
    pub fn new(service: Arc<dyn AsyncJobService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StageService for SentimentStage {
    async fn start(&self, ctx: &StageContext<'_>) -> Result<StageStart, ServiceError> {
        async_job::start(self.service.as_ref(), Stage::Sentiment, ctx).await
    }

    async fn poll(&self, handle: &str) -> Result<PollOutcome, ServiceError> {
        async_job::poll(self.service.as_ref(), handle).await
    }

    fn finalize(&self, raw: Vec<u8>) -> Result<Vec<u8>, ServiceError> {
        Ok(raw)
    }
}
