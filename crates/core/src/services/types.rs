//! Types shared by the external service clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by an external service call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Network failure, throttling or a server-side error. Worth retrying.
    #[error("Transient service error: {0}")]
    Transient(String),

    /// The service rejected the request. Retrying cannot help.
    #[error("Service rejected request: {0}")]
    Permanent(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }

    /// Classify an HTTP error status: 408, 429 and 5xx are transient,
    /// everything else is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        if status == 408 || status == 429 || status >= 500 {
            ServiceError::Transient(message)
        } else {
            ServiceError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Permanent(format!("Invalid response body: {}", err))
        } else if err.is_builder() {
            ServiceError::Permanent(err.to_string())
        } else {
            ServiceError::Transient(err.to_string())
        }
    }
}

/// Status of an external asynchronous job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalJobStatus {
    Running,
    Succeeded,
    Failed,
}

/// Status document returned by `GetJob`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalJob {
    pub status: ExternalJobStatus,
    /// Object key of the result, present once succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ExternalJob {
    pub fn running() -> Self {
        Self {
            status: ExternalJobStatus::Running,
            output_location: None,
            failure_reason: None,
        }
    }

    pub fn succeeded(output_location: impl Into<String>) -> Self {
        Self {
            status: ExternalJobStatus::Succeeded,
            output_location: Some(output_location.into()),
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ExternalJobStatus::Failed,
            output_location: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Input of a text-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInputs {
    /// Job the summary is generated for (used for tracing only).
    pub job_id: String,
    /// Rendered user prompt.
    pub prompt: String,
    /// Optional system instructions.
    pub system: Option<String>,
}

/// Result of a text-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub summary_text: String,
    pub model: String,
}
