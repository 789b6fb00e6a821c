//! Types for the job orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobRecord, JobStoreError, Stage};
use crate::services::ServiceError;

/// The only error a run returns: the job table could not be used.
/// Everything that goes wrong inside a stage ends up in the record instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Why a stage did not complete.
#[derive(Debug, Error)]
pub enum StageError {
    /// Non-retryable error from a service or the object store.
    #[error("{0}")]
    Service(ServiceError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ServiceError },

    /// The external job reported failure.
    #[error("external job failed: {0}")]
    ExternalFailure(String),

    #[error("{stage} stage timed out after {budget:?}")]
    Timeout { stage: Stage, budget: Duration },

    #[error("interrupted by shutdown")]
    Interrupted,

    /// Another instance took over the lease.
    #[error("lease lost")]
    LeaseLost,

    /// The conditional write guard tripped.
    #[error("{0}")]
    Conflict(JobStoreError),

    #[error("{0}")]
    Store(JobStoreError),
}

impl StageError {
    /// Errors that end the stage without writing FAILED.
    pub fn is_abandon(&self) -> bool {
        matches!(
            self,
            StageError::Interrupted
                | StageError::LeaseLost
                | StageError::Conflict(_)
                | StageError::Store(_)
        )
    }

    /// Label used for the stage duration metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            StageError::Timeout { .. } => "timeout",
            StageError::Interrupted => "interrupted",
            StageError::LeaseLost | StageError::Conflict(_) => "skipped",
            _ => "failed",
        }
    }
}

impl From<JobStoreError> for StageError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::ConflictingStatus { .. } | JobStoreError::InvalidTransition { .. } => {
                StageError::Conflict(err)
            }
            other => StageError::Store(other),
        }
    }
}

/// Result of one orchestrator invocation, with the record as it stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// This invocation drove the job to COMPLETED or FAILED.
    Finished(JobRecord),
    /// The job was already terminal; nothing was written.
    AlreadyTerminal(JobRecord),
    /// Another instance holds the lease; nothing was written.
    Busy(JobRecord),
    /// A conditional write lost a race; this invocation stopped.
    Skipped(JobRecord),
    /// Shutdown was requested mid-stage; the job can be resumed.
    Interrupted(JobRecord),
}

impl RunOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            RunOutcome::Finished(r)
            | RunOutcome::AlreadyTerminal(r)
            | RunOutcome::Busy(r)
            | RunOutcome::Skipped(r)
            | RunOutcome::Interrupted(r) => r,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            RunOutcome::Finished(r)
            | RunOutcome::AlreadyTerminal(r)
            | RunOutcome::Busy(r)
            | RunOutcome::Skipped(r)
            | RunOutcome::Interrupted(r) => r,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Finished(_) => "finished",
            RunOutcome::AlreadyTerminal(_) => "already_terminal",
            RunOutcome::Busy(_) => "busy",
            RunOutcome::Skipped(_) => "skipped",
            RunOutcome::Interrupted(_) => "interrupted",
        }
    }
}

/// Current status of the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the dispatcher is running.
    pub running: bool,
    /// Jobs being driven by this instance right now.
    pub in_flight: usize,
    pub max_concurrent_jobs: usize,
    pub pending_count: usize,
    pub transcribing_count: usize,
    pub analyzing_sentiment_count: usize,
    pub summarizing_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}
