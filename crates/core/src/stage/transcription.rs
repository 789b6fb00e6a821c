//! Transcription stage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::Stage;
use crate::services::{AsyncJobService, ServiceError};

use super::async_job;
use super::types::{PollOutcome, StageContext, StageService, StageStart};

/// Submits the source audio to the transcription service and stores the
/// plain-text transcript.
pub struct TranscriptionStage {
    service: Arc<dyn AsyncJobService>,
}

impl TranscriptionStage {
    pub fn new(service: Arc<dyn AsyncJobService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StageService for TranscriptionStage {
    async fn start(&self, ctx: &StageContext<'_>) -> Result<StageStart, ServiceError> {
        async_job::start(self.service.as_ref(), Stage::Transcription, ctx).await
    }

    async fn poll(&self, handle: &str) -> Result<PollOutcome, ServiceError> {
        async_job::poll(self.service.as_ref(), handle).await
    }

    fn finalize(&self, raw: Vec<u8>) -> Result<Vec<u8>, ServiceError> {
        Ok(extract_transcript(raw))
    }
}

/// Pull the text out of a transcription result document
/// (`results.transcripts[*].transcript`). Anything else is kept as is.
pub fn extract_transcript(raw: Vec<u8>) -> Vec<u8> {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&raw) else {
        return raw;
    };

    let Some(transcripts) = doc
        .pointer("/results/transcripts")
        .and_then(|t| t.as_array())
    else {
        return raw;
    };

    let parts: Vec<&str> = transcripts
        .iter()
        .filter_map(|t| t.get("transcript").and_then(|s| s.as_str()))
        .collect();

    if parts.is_empty() {
        return raw;
    }

    parts.join("\n").into_bytes()
}
