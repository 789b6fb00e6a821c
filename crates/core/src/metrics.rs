//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Trigger binding (event dispositions)
//! - Orchestrator (jobs, stages, polls, retries)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Trigger
// =============================================================================

/// Inbound events by disposition.
pub static EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("minutes_events_total", "Object-created events received"),
        &["disposition"], // "accepted", "ignored", "malformed"
    )
    .unwrap()
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Job records created.
pub static JOBS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("minutes_jobs_created_total", "Job records created").unwrap()
});

/// Runs ended, by outcome.
pub static JOB_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("minutes_job_runs_total", "Orchestrator runs by outcome"),
        &["outcome"], // "finished", "already_terminal", "busy", "skipped", "interrupted"
    )
    .unwrap()
});

/// Jobs that reached a terminal status, by status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("minutes_jobs_finished_total", "Jobs reaching a terminal status"),
        &["status"], // "COMPLETED", "FAILED"
    )
    .unwrap()
});

/// Jobs currently being driven by this instance.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("minutes_jobs_in_flight", "Jobs currently running").unwrap()
});

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("minutes_stage_duration_seconds", "Duration of pipeline stages")
            .buckets(vec![
                0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0, 3600.0,
            ]),
        &["stage", "result"], // result: "success", "failed", "timeout", "interrupted", "skipped"
    )
    .unwrap()
});

/// Status polls of external jobs.
pub static STAGE_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("minutes_stage_polls_total", "External job status polls"),
        &["stage"],
    )
    .unwrap()
});

/// Retried external calls after a transient error.
pub static STAGE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("minutes_stage_retries_total", "Retries after transient errors"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(EVENTS_RECEIVED.clone()),
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOB_RUNS.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(STAGE_POLLS.clone()),
        Box::new(STAGE_RETRIES.clone()),
    ]
}
