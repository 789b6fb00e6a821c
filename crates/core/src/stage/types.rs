//! Stage capability and its data types.

use async_trait::async_trait;

use crate::job::{JobRecord, Stage};
use crate::services::ServiceError;
use crate::storage::{ObjectStore, StorageError};

/// Where a stage's raw result can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// Object key written by the external service.
    Location(String),
    /// Result returned directly by the call.
    Inline(Vec<u8>),
}

/// Result of starting a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStart {
    /// An external job is running under `handle`; poll it.
    Submitted { handle: String },
    /// The call finished synchronously.
    Completed(StageOutput),
}

/// Result of one poll of an external job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running,
    Succeeded(StageOutput),
    /// The external job failed, with its reason.
    Failed(String),
}

/// What a stage sees of the job it works on.
pub struct StageContext<'a> {
    pub job: &'a JobRecord,
    pub objects: &'a dyn ObjectStore,
}

impl StageContext<'_> {
    /// Key of the artifact `stage` consumes, which an earlier stage must
    /// have written.
    pub fn input_key(&self, stage: Stage) -> Result<&str, ServiceError> {
        self.job.input_key(stage).ok_or_else(|| {
            ServiceError::Permanent(format!(
                "{} input missing from job {}",
                stage, self.job.job_id
            ))
        })
    }

    pub async fn read_text(&self, key: &str) -> Result<String, ServiceError> {
        let bytes = self.objects.get(key).await?;
        String::from_utf8(bytes)
            .map_err(|_| ServiceError::Permanent(format!("Object {} is not valid UTF-8", key)))
    }
}

/// One pipeline stage: start, poll and finalize behind a single interface
/// so the orchestrator loop does not depend on which service runs.
#[async_trait]
pub trait StageService: Send + Sync {
    /// Start the stage's external work.
    async fn start(&self, ctx: &StageContext<'_>) -> Result<StageStart, ServiceError>;

    /// Query a previously started external job.
    async fn poll(&self, handle: &str) -> Result<PollOutcome, ServiceError>;

    /// Turn the raw external result into the canonical artifact.
    fn finalize(&self, raw: Vec<u8>) -> Result<Vec<u8>, ServiceError>;
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        if err.is_retryable() {
            ServiceError::Transient(err.to_string())
        } else {
            ServiceError::Permanent(err.to_string())
        }
    }
}
