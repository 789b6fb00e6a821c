//! Testing utilities and mock implementations.
//!
//! Mocks of the external service traits, so the orchestrator can be driven
//! end to end without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use minutes_core::storage::MemoryObjectStore;
//! use minutes_core::testing::{fixtures, MockJobService, MockTextGenerator};
//!
//! let objects = MemoryObjectStore::new();
//! let transcription = MockJobService::new("transcription", objects.clone());
//! let sentiment = MockJobService::new("sentiment", objects.clone());
//! let generator = MockTextGenerator::new();
//!
//! transcription.set_output(fixtures::transcription_json("Hello team")).await;
//! sentiment.set_output(fixtures::sentiment_json("POSITIVE")).await;
//! ```

mod mock_job_service;
mod mock_text_generator;

pub use mock_job_service::{MockBehavior, MockJobService, RecordedStart};
pub use mock_text_generator::MockTextGenerator;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::orchestrator::{OrchestratorConfig, PollPolicy, RetryPolicy};

    /// A transcription-service result document carrying `text`.
    pub fn transcription_json(text: &str) -> Vec<u8> {
        serde_json::json!({
            "jobName": "mock",
            "results": {
                "transcripts": [{ "transcript": text }],
                "items": []
            },
            "status": "COMPLETED"
        })
        .to_string()
        .into_bytes()
    }

    /// A sentiment-service result document.
    pub fn sentiment_json(sentiment: &str) -> Vec<u8> {
        serde_json::json!({
            "Sentiment": sentiment,
            "SentimentScore": {
                "Positive": 0.7,
                "Negative": 0.1,
                "Neutral": 0.15,
                "Mixed": 0.05
            }
        })
        .to_string()
        .into_bytes()
    }

    /// Orchestrator config with millisecond polls and retries, for tests.
    pub fn fast_orchestrator_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            poll: PollPolicy {
                initial_interval_ms: 1,
                max_interval_ms: 5,
                multiplier: 2.0,
            },
            ..OrchestratorConfig::default()
        };
        config.stages.transcription.timeout_secs = 10;
        config.stages.sentiment.timeout_secs = 10;
        config.stages.summary.timeout_secs = 10;
        config
    }
}
