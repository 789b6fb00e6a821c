//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline status of a job.
///
/// State machine flow:
/// ```text
/// Pending -> Transcribing -> AnalyzingSentiment -> Summarizing -> Completed
///                |                  |                   |
///                +------------------+-------------------+--> Failed
/// ```
///
/// Every non-terminal status can transition to `Failed`. No other transition
/// may skip a status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Record created, transcription not yet started.
    Pending,
    /// Transcription job submitted (or about to be) and being polled.
    Transcribing,
    /// Transcript written; sentiment analysis pending or running.
    AnalyzingSentiment,
    /// Sentiment written; summary generation pending or running.
    Summarizing,
    /// All three artifacts written (terminal).
    Completed,
    /// A stage failed (terminal until re-driven).
    Failed,
}

impl JobStatus {
    /// All statuses in pipeline order, `Failed` last.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Transcribing,
        JobStatus::AnalyzingSentiment,
        JobStatus::Summarizing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Position along the success path. `Failed` has no position.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Transcribing => Some(1),
            JobStatus::AnalyzingSentiment => Some(2),
            JobStatus::Summarizing => Some(3),
            JobStatus::Completed => Some(4),
            JobStatus::Failed => None,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if a write moving from `self` to `next` keeps the
    /// status path monotonic.
    ///
    /// Same-status writes are allowed for non-terminal statuses (they
    /// persist external handles).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(target)) => target == current || target == current + 1,
            (None, Some(_)) => false,
        }
    }

    /// The stage that has to run next for a job in this status, if any.
    pub fn pending_stage(&self) -> Option<Stage> {
        match self {
            JobStatus::Pending | JobStatus::Transcribing => Some(Stage::Transcription),
            JobStatus::AnalyzingSentiment => Some(Stage::Sentiment),
            JobStatus::Summarizing => Some(Stage::Summary),
            JobStatus::Completed | JobStatus::Failed => None,
        }
    }

    /// Wire/storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Transcribing => "TRANSCRIBING",
            JobStatus::AnalyzingSentiment => "ANALYZING_SENTIMENT",
            JobStatus::Summarizing => "SUMMARIZING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Parse a wire/storage name. Case-insensitive.
    pub fn parse(value: &str) -> Option<JobStatus> {
        let upper = value.to_ascii_uppercase();
        Self::ALL.into_iter().find(|s| s.as_str() == upper)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete unit of pipeline work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    Sentiment,
    Summary,
}

impl Stage {
    /// Stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Transcription, Stage::Sentiment, Stage::Summary];

    /// Status a job carries while this stage is in progress.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Transcription => JobStatus::Transcribing,
            Stage::Sentiment => JobStatus::AnalyzingSentiment,
            Stage::Summary => JobStatus::Summarizing,
        }
    }

    /// Status written by this stage's finalize step.
    pub fn next_status(&self) -> JobStatus {
        match self {
            Stage::Transcription => JobStatus::AnalyzingSentiment,
            Stage::Sentiment => JobStatus::Summarizing,
            Stage::Summary => JobStatus::Completed,
        }
    }

    /// File name of the canonical artifact under the job's output folder.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcript.txt",
            Stage::Sentiment => "sentiment.json",
            Stage::Summary => "summary.md",
        }
    }

    /// Canonical object key for this stage's artifact.
    pub fn result_key(&self, output_prefix: &str, job_id: &str) -> String {
        format!("{}{}/{}", output_prefix, job_id, self.artifact_name())
    }

    /// Deterministic external job name for this stage and attempt.
    pub fn external_job_name(&self, job_id: &str, attempt: u32) -> String {
        format!("{}-{}-{}", job_id, self.as_str(), attempt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::Sentiment => "sentiment",
            Stage::Summary => "summary",
        }
    }

    pub fn parse(value: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job record: the durable status entity of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Partition key, derived from the source object.
    pub job_id: String,

    /// Current pipeline status.
    pub status: JobStatus,

    /// Object key of the uploaded source artifact.
    pub source_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_key: Option<String>,

    /// External handle of the submitted transcription job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_handle: Option<String>,

    /// External handle of the submitted sentiment job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_handle: Option<String>,

    /// Failure description, set only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Stage that failed, set only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    /// Run attempt (1-based). Incremented by each operator re-drive.
    pub attempt: u32,

    pub created_at: DateTime<Utc>,

    /// Advances on every write.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh `Pending` record.
    pub fn new(job_id: impl Into<String>, source_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            source_key: source_key.into(),
            transcript_key: None,
            sentiment_key: None,
            summary_key: None,
            transcription_handle: None,
            sentiment_handle: None,
            error_detail: None,
            failed_stage: None,
            attempt: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// External handle persisted for a stage. The summary stage has none.
    pub fn handle(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Transcription => self.transcription_handle.as_deref(),
            Stage::Sentiment => self.sentiment_handle.as_deref(),
            Stage::Summary => None,
        }
    }

    pub fn set_handle(&mut self, stage: Stage, handle: Option<String>) {
        match stage {
            Stage::Transcription => self.transcription_handle = handle,
            Stage::Sentiment => self.sentiment_handle = handle,
            Stage::Summary => {}
        }
    }

    /// Result key written by a stage's finalize step.
    pub fn result_key(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Transcription => self.transcript_key.as_deref(),
            Stage::Sentiment => self.sentiment_key.as_deref(),
            Stage::Summary => self.summary_key.as_deref(),
        }
    }

    pub fn set_result_key(&mut self, stage: Stage, key: String) {
        match stage {
            Stage::Transcription => self.transcript_key = Some(key),
            Stage::Sentiment => self.sentiment_key = Some(key),
            Stage::Summary => self.summary_key = Some(key),
        }
    }

    /// Key of the artifact a stage consumes.
    pub fn input_key(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Transcription => Some(self.source_key.as_str()),
            Stage::Sentiment => self.transcript_key.as_deref(),
            Stage::Summary => self.transcript_key.as_deref(),
        }
    }

    /// The three result keys, once the job is complete.
    pub fn minutes(&self) -> Option<MinutesKeys> {
        if self.status != JobStatus::Completed {
            return None;
        }
        Some(MinutesKeys {
            transcript_key: self.transcript_key.clone()?,
            sentiment_key: self.sentiment_key.clone()?,
            summary_key: self.summary_key.clone()?,
        })
    }
}

/// The artifact set of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinutesKeys {
    pub transcript_key: String,
    pub sentiment_key: String,
    pub summary_key: String,
}
