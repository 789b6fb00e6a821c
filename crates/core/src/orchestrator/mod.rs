//! Job orchestrator.
//!
//! Drives a job through its stages in a fixed order:
//! - **Transcription**: asynchronous external job, polled
//! - **Sentiment**: asynchronous external job over the transcript, polled
//! - **Summary**: one synchronous text generation call
//!
//! The job record is the only state that survives a crash. Any run of the
//! same job picks up where the record says it is.

mod config;
mod dispatcher;
mod retry;
mod runner;
mod types;

pub use config::{OrchestratorConfig, PollPolicy, RetryPolicy, StageConfig, StagesConfig};
pub use dispatcher::{Dispatch, JobDispatcher};
pub use runner::Orchestrator;
pub use types::{OrchestratorError, OrchestratorStatus, RunOutcome, StageError};
