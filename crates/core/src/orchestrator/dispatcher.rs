//! Job dispatcher: runs orchestrator invocations as background tasks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::job::{JobFilter, JobRecord, JobStatus};
use crate::metrics;

use super::runner::Orchestrator;
use super::types::{OrchestratorError, OrchestratorStatus, RunOutcome};

/// How long `stop` waits for in-flight runs to notice the interrupt.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to a dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A task was spawned for the job.
    Spawned,
    /// A task for the job is already queued or running here.
    AlreadyInFlight,
    /// The dispatcher is stopped; the job was only recorded.
    NotRunning,
}

/// Bounded-concurrency front of the [`Orchestrator`].
pub struct JobDispatcher {
    orchestrator: Arc<Orchestrator>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    running: Arc<AtomicBool>,
}

impl JobDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let permits = orchestrator.config().max_concurrent_jobs.max(1);
        Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(permits)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start accepting work. Resumes interrupted jobs when configured to.
    /// Returns the number of jobs recovered.
    pub async fn start(&self) -> usize {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return 0;
        }

        info!(
            instance_id = %self.orchestrator.instance_id(),
            max_concurrent_jobs = self.orchestrator.config().max_concurrent_jobs,
            "Starting job dispatcher"
        );
        self.orchestrator.resume();

        if self.orchestrator.config().recover_on_start {
            self.recover()
        } else {
            0
        }
    }

    /// Stop accepting work and interrupt in-flight runs. Interrupted jobs
    /// keep their persisted state and resume on the next start.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Dispatcher not running");
            return;
        }

        info!("Stopping job dispatcher");
        self.orchestrator.interrupt();

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let left = self.in_flight_count();
        if left > 0 {
            warn!(in_flight = left, "Runs still in flight after stop");
        }
        info!("Job dispatcher stopped");
    }

    /// Queue a run for a job.
    pub fn dispatch(&self, job_id: &str, source_key: &str) -> Dispatch {
        if !self.is_running() {
            return Dispatch::NotRunning;
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(job_id.to_string()) {
                return Dispatch::AlreadyInFlight;
            }
        }
        metrics::JOBS_IN_FLIGHT.inc();

        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        let in_flight = Arc::clone(&self.in_flight);
        let job_id = job_id.to_string();
        let source_key = source_key.to_string();

        tokio::spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => match orchestrator.run(&job_id, &source_key).await {
                    Ok(outcome) => log_outcome(&outcome),
                    Err(e) => error!(job_id = %job_id, error = %e, "Run failed"),
                },
                Err(_) => warn!(job_id = %job_id, "Dispatcher closed before run"),
            }

            in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job_id);
            metrics::JOBS_IN_FLIGHT.dec();
        });

        Dispatch::Spawned
    }

    /// Reopen a FAILED job and queue a run for it.
    pub async fn redrive(&self, job_id: &str) -> Result<JobRecord, OrchestratorError> {
        let reopened = self.orchestrator.reopen(job_id, "operator").await?;
        self.dispatch(&reopened.job_id, &reopened.source_key);
        Ok(reopened)
    }

    /// Queue every non-terminal job in the job table.
    fn recover(&self) -> usize {
        let filter = JobFilter::new().active().with_limit(1000);
        let jobs = match self.orchestrator.store().list(&filter) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list jobs for recovery");
                return 0;
            }
        };

        let mut recovered = 0;
        for job in jobs {
            if self.dispatch(&job.job_id, &job.source_key) == Dispatch::Spawned {
                info!(job_id = %job.job_id, status = %job.status, "Recovered job");
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered unfinished jobs");
        }
        recovered
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Current dispatcher status with job counts per status.
    pub fn status(&self) -> OrchestratorStatus {
        let store = self.orchestrator.store();
        let count = |status: JobStatus| {
            store
                .count(&JobFilter::new().with_status(status))
                .unwrap_or(0) as usize
        };

        OrchestratorStatus {
            running: self.is_running(),
            in_flight: self.in_flight_count(),
            max_concurrent_jobs: self.orchestrator.config().max_concurrent_jobs,
            pending_count: count(JobStatus::Pending),
            transcribing_count: count(JobStatus::Transcribing),
            analyzing_sentiment_count: count(JobStatus::AnalyzingSentiment),
            summarizing_count: count(JobStatus::Summarizing),
            completed_count: count(JobStatus::Completed),
            failed_count: count(JobStatus::Failed),
        }
    }
}

fn log_outcome(outcome: &RunOutcome) {
    let record = outcome.record();
    match outcome {
        RunOutcome::Finished(_) => info!(
            job_id = %record.job_id,
            status = %record.status,
            "Run finished"
        ),
        _ => info!(
            job_id = %record.job_id,
            status = %record.status,
            outcome = outcome.label(),
            "Run ended"
        ),
    }
}
