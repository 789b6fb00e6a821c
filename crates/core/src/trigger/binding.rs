//! Maps object-created events to orchestrator invocations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::event::ObjectCreatedEvent;
use crate::metrics;

const MAX_SLUG_LEN: usize = 48;
const HASH_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// Which events start a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_detail_type")]
    pub detail_type: String,

    /// Bucket the binding listens to.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Only keys under this prefix start a job.
    #[serde(default = "default_watched_prefix")]
    pub watched_prefix: String,
}

fn default_source() -> String {
    "object-store".to_string()
}

fn default_detail_type() -> String {
    "ObjectCreated".to_string()
}

fn default_bucket() -> String {
    "minutes".to_string()
}

fn default_watched_prefix() -> String {
    "meetings/".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            detail_type: default_detail_type(),
            bucket: default_bucket(),
            watched_prefix: default_watched_prefix(),
        }
    }
}

/// A job to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub job_id: String,
    pub bucket: String,
    pub source_key: String,
}

/// What the binding did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Accepted(Invocation),
    Ignored(String),
}

/// Filters events and derives job IDs.
#[derive(Debug, Clone)]
pub struct TriggerBinding {
    config: TriggerConfig,
    output_prefix: String,
}

impl TriggerBinding {
    /// `output_prefix` is where artifacts are written; keys under it never
    /// start a job.
    pub fn new(config: TriggerConfig, output_prefix: impl Into<String>) -> Self {
        Self {
            config,
            output_prefix: output_prefix.into(),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Parse and bind a raw event body.
    pub fn bind_json(&self, body: &[u8]) -> Result<BindOutcome, TriggerError> {
        let event: ObjectCreatedEvent = serde_json::from_slice(body).map_err(|e| {
            metrics::EVENTS_RECEIVED
                .with_label_values(&["malformed"])
                .inc();
            warn!(error = %e, "Rejected malformed event");
            TriggerError::MalformedEvent(e.to_string())
        })?;
        Ok(self.bind(&event))
    }

    pub fn bind(&self, event: &ObjectCreatedEvent) -> BindOutcome {
        let outcome = match self.ignore_reason(event) {
            Some(reason) => BindOutcome::Ignored(reason),
            None => BindOutcome::Accepted(Invocation {
                job_id: derive_job_id(
                    &event.detail.bucket,
                    &event.detail.object_key,
                    &self.config.watched_prefix,
                ),
                bucket: event.detail.bucket.clone(),
                source_key: event.detail.object_key.clone(),
            }),
        };

        match &outcome {
            BindOutcome::Accepted(invocation) => {
                metrics::EVENTS_RECEIVED
                    .with_label_values(&["accepted"])
                    .inc();
                debug!(job_id = %invocation.job_id, source_key = %invocation.source_key, "Event accepted");
            }
            BindOutcome::Ignored(reason) => {
                metrics::EVENTS_RECEIVED
                    .with_label_values(&["ignored"])
                    .inc();
                warn!(key = %event.detail.object_key, reason = %reason, "Event ignored");
            }
        }
        outcome
    }

    fn ignore_reason(&self, event: &ObjectCreatedEvent) -> Option<String> {
        let key = &event.detail.object_key;

        if event.source != self.config.source {
            return Some(format!("unexpected source '{}'", event.source));
        }
        if event.detail_type != self.config.detail_type {
            return Some(format!("unexpected detail type '{}'", event.detail_type));
        }
        if event.detail.bucket != self.config.bucket {
            return Some(format!("unexpected bucket '{}'", event.detail.bucket));
        }
        if !self.output_prefix.is_empty() && key.starts_with(&self.output_prefix) {
            return Some("key is under the output prefix".to_string());
        }
        if !key.starts_with(&self.config.watched_prefix) {
            return Some(format!(
                "key is outside the watched prefix '{}'",
                self.config.watched_prefix
            ));
        }
        if key.ends_with('/') {
            return Some("key is a directory placeholder".to_string());
        }
        if key.len() == self.config.watched_prefix.len() {
            return Some("key names the watched prefix itself".to_string());
        }
        None
    }
}

/// Deterministic job ID for an object: a readable slug of the key below
/// the watched prefix, then 16 hex chars of SHA-256 over `bucket/key`.
pub fn derive_job_id(bucket: &str, key: &str, watched_prefix: &str) -> String {
    let relative = key.strip_prefix(watched_prefix).unwrap_or(key);

    let mut slug = String::with_capacity(MAX_SLUG_LEN);
    let mut gap = false;
    for c in relative.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            gap = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');

    let digest = format!("{:x}", Sha256::digest(format!("{bucket}/{key}").as_bytes()));
    let hash = &digest[..HASH_LEN];

    if slug.is_empty() {
        format!("job-{hash}")
    } else {
        format!("{slug}-{hash}")
    }
}
