//! External AI services: transcription, sentiment analysis and text
//! generation.

mod anthropic;
mod config;
mod http_job;
mod traits;
mod types;

pub use anthropic::AnthropicGenerator;
pub use config::{GenerationConfig, JobServiceConfig, ServicesConfig, DEFAULT_PROMPT_TEMPLATE};
pub use http_job::HttpJobService;
pub use traits::{AsyncJobService, TextGenerationService};
pub use types::{ExternalJob, ExternalJobStatus, GenerationOutput, PromptInputs, ServiceError};
