//! Pipeline stages and the table mapping each [`Stage`] to its service.

mod async_job;
mod sentiment;
mod summary;
mod transcription;
mod types;

use std::sync::Arc;

use crate::job::Stage;
use crate::services::{AsyncJobService, TextGenerationService};

pub use sentiment::SentimentStage;
pub use summary::{PromptTemplate, SummaryStage};
pub use transcription::{extract_transcript, TranscriptionStage};
pub use types::{PollOutcome, StageContext, StageOutput, StageService, StageStart};

/// The stage services the orchestrator dispatches to.
#[derive(Clone)]
pub struct StageTable {
    transcription: Arc<dyn StageService>,
    sentiment: Arc<dyn StageService>,
    summary: Arc<dyn StageService>,
}

impl StageTable {
    pub fn new(
        transcription: Arc<dyn StageService>,
        sentiment: Arc<dyn StageService>,
        summary: Arc<dyn StageService>,
    ) -> Self {
        Self {
            transcription,
            sentiment,
            summary,
        }
    }

    /// Build the standard table from the three external services.
    pub fn from_services(
        transcription: Arc<dyn AsyncJobService>,
        sentiment: Arc<dyn AsyncJobService>,
        generator: Arc<dyn TextGenerationService>,
        prompt: PromptTemplate,
    ) -> Self {
        Self::new(
            Arc::new(TranscriptionStage::new(transcription)),
            Arc::new(SentimentStage::new(sentiment)),
            Arc::new(SummaryStage::new(generator, prompt)),
        )
    }

    pub fn get(&self, stage: Stage) -> &Arc<dyn StageService> {
        match stage {
            Stage::Transcription => &self.transcription,
            Stage::Sentiment => &self.sentiment,
            Stage::Summary => &self.summary,
        }
    }
}
