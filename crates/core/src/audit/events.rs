use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Trigger events
    EventReceived {
        job_id: String,
        bucket: String,
        source_key: String,
    },
    EventIgnored {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_key: Option<String>,
    },

    // Job lifecycle
    JobCreated {
        job_id: String,
        source_key: String,
    },
    JobStatusChanged {
        job_id: String,
        from_status: String,
        to_status: String,
    },
    StageStarted {
        job_id: String,
        stage: String,
        attempt: u32,
        /// External job handle, absent for synchronous stages
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<String>,
    },
    /// A persisted handle was found and polling picked up where it left off
    StageResumed {
        job_id: String,
        stage: String,
        handle: String,
    },
    StageRetried {
        job_id: String,
        stage: String,
        /// Retry number (1 = first retry)
        retry: u32,
        delay_ms: u64,
        error: String,
    },
    JobFailed {
        job_id: String,
        stage: String,
        error: String,
    },
    JobCompleted {
        job_id: String,
        transcript_key: String,
        sentiment_key: String,
        summary_key: String,
    },
    /// A run found nothing to do (duplicate delivery, lost race, busy lease)
    RedeliverySkipped {
        job_id: String,
        status: String,
        reason: String,
    },
    JobRedriven {
        job_id: String,
        stage: String,
        attempt: u32,
        /// "event" or "operator"
        trigger: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::EventReceived { .. } => "event_received",
            Self::EventIgnored { .. } => "event_ignored",
            Self::JobCreated { .. } => "job_created",
            Self::JobStatusChanged { .. } => "job_status_changed",
            Self::StageStarted { .. } => "stage_started",
            Self::StageResumed { .. } => "stage_resumed",
            Self::StageRetried { .. } => "stage_retried",
            Self::JobFailed { .. } => "job_failed",
            Self::JobCompleted { .. } => "job_completed",
            Self::RedeliverySkipped { .. } => "redelivery_skipped",
            Self::JobRedriven { .. } => "job_redriven",
        }
    }

    /// Extract job_id if this event is job-related
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::EventReceived { job_id, .. }
            | Self::JobCreated { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::StageStarted { job_id, .. }
            | Self::StageResumed { job_id, .. }
            | Self::StageRetried { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::RedeliverySkipped { job_id, .. }
            | Self::JobRedriven { job_id, .. } => Some(job_id),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::EventIgnored { .. } => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub data: AuditEvent,
}
