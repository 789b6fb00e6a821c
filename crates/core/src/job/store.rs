//! Job storage trait and types.

use std::time::Duration;

use thiserror::Error;

use super::{JobRecord, JobStatus};

/// Error type for job table operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobStoreError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The persisted status differs from the one the writer expected.
    /// Another invocation already advanced (or failed) the job.
    #[error("Conflicting status for job {job_id}: expected {expected}, found {actual}")]
    ConflictingStatus {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The requested status change is not on the allowed path.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobStoreError {
    fn from(err: rusqlite::Error) -> Self {
        JobStoreError::Database(err.to_string())
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by exact status.
    pub status: Option<JobStatus>,
    /// Only jobs that are neither completed nor failed.
    pub active_only: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            active_only: false,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to non-terminal jobs.
    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job table backends.
///
/// Every mutating write is conditional on the status the writer last read,
/// so concurrent or redelivered invocations cannot overwrite each other.
pub trait JobStore: Send + Sync {
    /// Insert a `PENDING` record unless one already exists for `job_id`.
    /// Returns the persisted record and whether this call created it.
    fn create_if_absent(
        &self,
        job_id: &str,
        source_key: &str,
    ) -> Result<(JobRecord, bool), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: &str) -> Result<Option<JobRecord>, JobStoreError>;

    /// Write `record` if the persisted status still equals `expected_prior`
    /// and the status change is allowed. Returns the record as written
    /// (with its new `updated_at`).
    fn put(&self, record: &JobRecord, expected_prior: JobStatus)
        -> Result<JobRecord, JobStoreError>;

    /// List jobs matching the filter, oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Take the single-writer lease for `owner`. Succeeds when the lease is
    /// free, expired, or already held by `owner`.
    fn try_acquire_lease(
        &self,
        job_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, JobStoreError>;

    /// Extend a lease held by `owner`. Returns false if `owner` lost it.
    fn renew_lease(&self, job_id: &str, owner: &str, ttl: Duration)
        -> Result<bool, JobStoreError>;

    /// Drop a lease held by `owner`. No-op if someone else holds it.
    fn release_lease(&self, job_id: &str, owner: &str) -> Result<(), JobStoreError>;

    /// Reopen a `FAILED` job at the stage that failed, keeping the results of
    /// the stages that completed and incrementing `attempt`.
    fn reopen(&self, job_id: &str) -> Result<JobRecord, JobStoreError>;
}
