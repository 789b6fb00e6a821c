//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::Stage;

/// Configuration for the job orchestrator and dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the dispatcher.
    /// When disabled, events are still recorded but no job is run.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lease owner name. Keep it stable across restarts so a restarted
    /// process can take back the leases it held; give every instance
    /// sharing one job table its own name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Maximum jobs driven concurrently by this instance.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long a run's single-writer lease lasts without renewal. The
    /// lease is renewed before every external call, so it has to outlive
    /// the longest single call (the summary budget) plus one delay.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Resume non-terminal jobs found in the job table at startup.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,

    /// A new event for the source of a FAILED job reopens it.
    ///
    /// Events carry no identity, so a late duplicate of the event that
    /// started the job re-drives it just like a fresh upload does. Turn this
    /// off when the notifier redelivers aggressively; operators can still
    /// re-drive through the API.
    #[serde(default = "default_true")]
    pub redrive_failed_on_event: bool,

    /// Retry policy for transient errors, unless a stage overrides it.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Status polling of asynchronous external jobs.
    #[serde(default)]
    pub poll: PollPolicy,

    #[serde(default)]
    pub stages: StagesConfig,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_lease_ttl() -> u64 {
    900
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_id: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            lease_ttl_secs: default_lease_ttl(),
            recover_on_start: true,
            redrive_failed_on_event: true,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            stages: StagesConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn stage(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Transcription => &self.stages.transcription,
            Stage::Sentiment => &self.stages.sentiment,
            Stage::Summary => &self.stages.summary,
        }
    }

    /// Retry policy in effect for a stage.
    pub fn retry_for(&self, stage: Stage) -> &RetryPolicy {
        self.stage(stage).retry.as_ref().unwrap_or(&self.retry)
    }

    /// Time budget of a stage (start, polls and finalize together).
    pub fn budget_for(&self, stage: Stage) -> Duration {
        Duration::from_millis(self.stage(stage).timeout_ms())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Bounded exponential backoff for transient errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts of one call, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound of any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Exponential polling schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Growth factor applied after every poll.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_interval() -> u64 {
    2_000
}

fn default_max_interval() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    1.5
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            multiplier: default_multiplier(),
        }
    }
}

/// Per-stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StagesFile")]
pub struct StagesConfig {
    pub transcription: StageConfig,
    pub sentiment: StageConfig,
    pub summary: StageConfig,
}

/// `[stages.*]` tables as written. Anything left out keeps the stage's
/// own default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StagesFile {
    transcription: StageFile,
    sentiment: StageFile,
    summary: StageFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageFile {
    timeout_secs: Option<u64>,
    timeout_ms: Option<u64>,
    retry: Option<RetryPolicy>,
}

impl StageFile {
    fn over(self, base: StageConfig) -> StageConfig {
        StageConfig {
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            timeout_ms: self.timeout_ms.or(base.timeout_ms),
            retry: self.retry.or(base.retry),
        }
    }
}

impl From<StagesFile> for StagesConfig {
    fn from(file: StagesFile) -> Self {
        Self {
            transcription: file.transcription.over(StageConfig::transcription()),
            sentiment: file.sentiment.over(StageConfig::sentiment()),
            summary: file.summary.over(StageConfig::summary()),
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            transcription: StageConfig::transcription(),
            sentiment: StageConfig::sentiment(),
            summary: StageConfig::summary(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageConfig {
    /// Stage budget in seconds.
    pub timeout_secs: u64,

    /// Finer-grained budget; wins over `timeout_secs` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Overrides the global retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl StageConfig {
    fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            timeout_ms: None,
            retry: None,
        }
    }

    fn transcription() -> Self {
        Self::with_timeout(3600)
    }

    fn sentiment() -> Self {
        Self::with_timeout(1800)
    }

    fn summary() -> Self {
        Self::with_timeout(600)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
            .unwrap_or_else(|| self.timeout_secs.saturating_mul(1000))
    }
}
