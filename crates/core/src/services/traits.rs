//! Contracts of the external AI services.

use async_trait::async_trait;

use super::types::{ExternalJob, GenerationOutput, PromptInputs, ServiceError};

/// An asynchronous start/describe service (transcription, sentiment).
#[async_trait]
pub trait AsyncJobService: Send + Sync {
    /// Returns the name of this service.
    fn name(&self) -> &str;

    /// Start a job over the object at `input_key`. `job_name` is
    /// deterministic per job, stage and attempt. Returns the opaque handle.
    async fn start_job(&self, input_key: &str, job_name: &str) -> Result<String, ServiceError>;

    /// Describe a previously started job.
    async fn get_job(&self, handle: &str) -> Result<ExternalJob, ServiceError>;
}

/// A synchronous single-call text generator.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Generate the summary text for the given prompt.
    async fn invoke(&self, inputs: PromptInputs) -> Result<GenerationOutput, ServiceError>;
}
