//! Stage sequencer.
//!
//! Drives one job through transcription, sentiment and summary:
//! - Every write is conditional on the status this run last read.
//! - The next stage is derived from the persisted status alone, so a
//!   re-invocation never re-runs a completed stage.
//! - A persisted external handle is polled, never re-submitted.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::job::{JobRecord, JobStatus, JobStore, JobStoreError, Stage};
use crate::metrics;
use crate::services::ServiceError;
use crate::stage::{
    PollOutcome, StageContext, StageOutput, StageService, StageStart, StageTable,
};
use crate::storage::ObjectStore;

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, RunOutcome, StageError};

/// Holds a job's lease for the duration of a run. Dropping it (including
/// when the run's future is cancelled) gives the job back.
struct LeaseGuard {
    store: Arc<dyn JobStore>,
    active: Arc<Mutex<HashSet<String>>>,
    job_id: String,
    owner: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.job_id, &self.owner) {
            warn!(job_id = %self.job_id, error = %e, "Failed to release lease");
        }
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.job_id);
    }
}

/// Audit events raised while a stage runs under its budget.
///
/// Events go out without waiting for channel capacity. Once one does not
/// fit, it and every later event are held in order until [`Self::flush`],
/// which runs after the stage has settled, so a slow audit writer never
/// eats into a stage budget.
struct StageEvents<'a> {
    audit: Option<&'a AuditHandle>,
    held: Mutex<Vec<AuditEvent>>,
}

impl<'a> StageEvents<'a> {
    fn new(audit: Option<&'a AuditHandle>) -> Self {
        Self {
            audit,
            held: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, event: AuditEvent) {
        let Some(audit) = self.audit else {
            return;
        };
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.is_empty() {
            held.push(event);
        } else if let Err(event) = audit.try_emit(event) {
            held.push(event);
        }
    }

    async fn flush(self) {
        let held = self.held.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(audit) = self.audit {
            for event in held {
                audit.emit(event).await;
            }
        }
    }
}

/// The job orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    output_prefix: String,
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    stages: StageTable,
    audit: Option<AuditHandle>,
    instance_id: String,

    // Jobs with a run in this process. The lease covers other processes.
    active: Arc<Mutex<HashSet<String>>>,
    stopping: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        output_prefix: impl Into<String>,
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        stages: StageTable,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| "minutes-local".to_string());

        Self {
            config,
            output_prefix: output_prefix.into(),
            store,
            objects,
            stages,
            audit,
            instance_id,
            active: Arc::new(Mutex::new(HashSet::new())),
            stopping: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Lease owner name of this instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Signal every in-flight run to stop at its next suspension point.
    /// Runs started afterwards return `Interrupted` until [`Self::resume`].
    pub fn interrupt(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Accept runs again after [`Self::interrupt`].
    pub fn resume(&self) {
        self.stopping.store(false, Ordering::SeqCst);
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    fn reload(&self, job_id: &str) -> Result<JobRecord, OrchestratorError> {
        self.store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Create the job record for a source object unless it exists.
    pub async fn register(
        &self,
        job_id: &str,
        source_key: &str,
    ) -> Result<(JobRecord, bool), OrchestratorError> {
        let (record, created) = self.store.create_if_absent(job_id, source_key)?;
        if created {
            info!(job_id = %job_id, source_key = %source_key, "Job created");
            metrics::JOBS_CREATED.inc();
            self.emit(AuditEvent::JobCreated {
                job_id: job_id.to_string(),
                source_key: source_key.to_string(),
            })
            .await;
        }
        Ok((record, created))
    }

    /// Drive the job for `source_key` as far as it will go.
    ///
    /// Safe to call any number of times for the same job.
    pub async fn run(&self, job_id: &str, source_key: &str) -> Result<RunOutcome, OrchestratorError> {
        let outcome = self.run_inner(job_id, source_key).await;
        if let Ok(ref outcome) = outcome {
            metrics::JOB_RUNS.with_label_values(&[outcome.label()]).inc();
        }
        outcome
    }

    async fn run_inner(
        &self,
        job_id: &str,
        source_key: &str,
    ) -> Result<RunOutcome, OrchestratorError> {
        let (record, _) = self.register(job_id, source_key).await?;

        if let Some(reason) = self.terminal_reason(&record) {
            self.note_skip(&record, reason).await;
            return Ok(RunOutcome::AlreadyTerminal(record));
        }

        let Some(_lease) = self.acquire_lease(job_id)? else {
            let current = self.reload(job_id)?;
            self.note_skip(&current, "another run holds the lease").await;
            return Ok(RunOutcome::Busy(current));
        };

        let mut record = self.reload(job_id)?;
        if let Some(reason) = self.terminal_reason(&record) {
            self.note_skip(&record, reason).await;
            return Ok(RunOutcome::AlreadyTerminal(record));
        }

        if record.status == JobStatus::Failed {
            record = match self.reopen(job_id, "event").await {
                Ok(reopened) => reopened,
                // Reopened by someone else in the meantime.
                Err(OrchestratorError::Store(JobStoreError::InvalidTransition { .. })) => {
                    self.reload(job_id)?
                }
                Err(e) => return Err(e),
            };
        }

        self.drive(record).await
    }

    /// Why a run for this record has nothing to do, if it has not.
    fn terminal_reason(&self, record: &JobRecord) -> Option<&'static str> {
        match record.status {
            JobStatus::Completed => Some("job already completed"),
            JobStatus::Failed if !self.config.redrive_failed_on_event => {
                Some("job failed and event re-drive is disabled")
            }
            _ => None,
        }
    }

    async fn note_skip(&self, record: &JobRecord, reason: &str) {
        debug!(job_id = %record.job_id, status = %record.status, reason = %reason, "Nothing to do for job");
        self.emit(AuditEvent::RedeliverySkipped {
            job_id: record.job_id.clone(),
            status: record.status.to_string(),
            reason: reason.to_string(),
        })
        .await;
    }

    fn acquire_lease(&self, job_id: &str) -> Result<Option<LeaseGuard>, OrchestratorError> {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(job_id.to_string()) {
                return Ok(None);
            }
        }

        let acquired = self
            .store
            .try_acquire_lease(job_id, &self.instance_id, self.config.lease_ttl());

        match acquired {
            Ok(true) => Ok(Some(LeaseGuard {
                store: Arc::clone(&self.store),
                active: Arc::clone(&self.active),
                job_id: job_id.to_string(),
                owner: self.instance_id.clone(),
            })),
            other => {
                let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
                active.remove(job_id);
                other?;
                Ok(None)
            }
        }
    }

    /// Reopen a FAILED job at the stage that failed.
    pub async fn reopen(&self, job_id: &str, trigger: &str) -> Result<JobRecord, OrchestratorError> {
        let reopened = self.store.reopen(job_id)?;
        let stage = reopened
            .status
            .pending_stage()
            .unwrap_or(Stage::Transcription);

        info!(job_id = %job_id, stage = %stage, attempt = reopened.attempt, trigger = %trigger, "Job re-driven");
        self.emit(AuditEvent::JobRedriven {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            attempt: reopened.attempt,
            trigger: trigger.to_string(),
        })
        .await;
        self.emit(AuditEvent::JobStatusChanged {
            job_id: job_id.to_string(),
            from_status: JobStatus::Failed.to_string(),
            to_status: reopened.status.to_string(),
        })
        .await;

        Ok(reopened)
    }

    /// Run stages until the job is terminal or the run has to stop.
    async fn drive(&self, record: JobRecord) -> Result<RunOutcome, OrchestratorError> {
        let job_id = record.job_id.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut progressed = false;

        loop {
            let record = self.reload(&job_id)?;

            if self.stopping.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Interrupted(record));
            }

            let Some(stage) = record.status.pending_stage() else {
                return Ok(if progressed {
                    RunOutcome::Finished(record)
                } else {
                    RunOutcome::AlreadyTerminal(record)
                });
            };

            let budget = self.config.budget_for(stage);
            let started = Instant::now();

            let events = StageEvents::new(self.audit.as_ref());
            let result = tokio::select! {
                result = tokio::time::timeout(budget, self.execute_stage(stage, record, &events)) => {
                    result.unwrap_or(Err(StageError::Timeout { stage, budget }))
                }
                _ = shutdown_rx.recv() => Err(StageError::Interrupted),
            };
            events.flush().await;

            let label = match &result {
                Ok(_) => "success",
                Err(e) => e.metric_label(),
            };
            metrics::STAGE_DURATION
                .with_label_values(&[stage.as_str(), label])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(_) => progressed = true,
                Err(e) if e.is_abandon() => return self.abandon(&job_id, stage, e).await,
                Err(e) => match self.fail(&job_id, stage, e).await? {
                    Some(outcome) => return Ok(outcome),
                    // The stage committed before the error surfaced.
                    None => progressed = true,
                },
            }
        }
    }

    /// End the run without writing FAILED.
    async fn abandon(
        &self,
        job_id: &str,
        stage: Stage,
        err: StageError,
    ) -> Result<RunOutcome, OrchestratorError> {
        match err {
            StageError::Interrupted => {
                info!(job_id = %job_id, stage = %stage, "Run interrupted, job left resumable");
                Ok(RunOutcome::Interrupted(self.reload(job_id)?))
            }
            StageError::Store(e) => {
                error!(job_id = %job_id, stage = %stage, error = %e, "Job store failure");
                Err(e.into())
            }
            e => {
                warn!(job_id = %job_id, stage = %stage, reason = %e, "Stopping run, job advanced elsewhere");
                let current = self.reload(job_id)?;
                self.note_skip(&current, &e.to_string()).await;
                Ok(RunOutcome::Skipped(current))
            }
        }
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        record: JobRecord,
        events: &StageEvents<'_>,
    ) -> Result<JobRecord, StageError> {
        let service = Arc::clone(self.stages.get(stage));
        let job_id = record.job_id.clone();

        let (record, output) = match record.handle(stage).map(str::to_string) {
            Some(handle) => {
                info!(job_id = %job_id, stage = %stage, handle = %handle, "Resuming stage");
                events.push(AuditEvent::StageResumed {
                    job_id: job_id.clone(),
                    stage: stage.to_string(),
                    handle: handle.clone(),
                });
                let output = self
                    .poll_until_done(stage, service.as_ref(), &job_id, &handle, events)
                    .await?;
                (record, output)
            }
            None => {
                let start = {
                    let ctx = StageContext {
                        job: &record,
                        objects: self.objects.as_ref(),
                    };
                    let ctx = &ctx;
                    let service = service.as_ref();
                    self.with_retry(&job_id, stage, events, move || service.start(ctx))
                        .await?
                };

                match start {
                    StageStart::Submitted { handle } => {
                        let mut next = record.clone();
                        next.status = stage.status();
                        next.set_handle(stage, Some(handle.clone()));
                        let written = self.persist(&next, &record, events)?;

                        info!(job_id = %job_id, stage = %stage, handle = %handle, "Stage started");
                        events.push(AuditEvent::StageStarted {
                            job_id: job_id.clone(),
                            stage: stage.to_string(),
                            attempt: written.attempt,
                            handle: Some(handle.clone()),
                        });

                        let output = self
                            .poll_until_done(stage, service.as_ref(), &job_id, &handle, events)
                            .await?;
                        (written, output)
                    }
                    StageStart::Completed(output) => {
                        let written = if record.status != stage.status() {
                            let mut next = record.clone();
                            next.status = stage.status();
                            self.persist(&next, &record, events)?
                        } else {
                            record
                        };

                        info!(job_id = %job_id, stage = %stage, "Stage call returned");
                        events.push(AuditEvent::StageStarted {
                            job_id: job_id.clone(),
                            stage: stage.to_string(),
                            attempt: written.attempt,
                            handle: None,
                        });
                        (written, output)
                    }
                }
            }
        };

        self.finalize(stage, service.as_ref(), record, output, events)
            .await
    }

    /// Poll an external job with growing intervals until it settles.
    async fn poll_until_done(
        &self,
        stage: Stage,
        service: &dyn StageService,
        job_id: &str,
        handle: &str,
        events: &StageEvents<'_>,
    ) -> Result<StageOutput, StageError> {
        let mut interval = self.config.poll.initial();

        loop {
            let outcome = self
                .with_retry(job_id, stage, events, move || service.poll(handle))
                .await?;
            metrics::STAGE_POLLS.with_label_values(&[stage.as_str()]).inc();

            match outcome {
                PollOutcome::Succeeded(output) => return Ok(output),
                PollOutcome::Failed(reason) => return Err(StageError::ExternalFailure(reason)),
                PollOutcome::Running => {}
            }

            debug!(job_id = %job_id, stage = %stage, next_poll_ms = interval.as_millis() as u64, "External job still running");
            tokio::time::sleep(interval).await;
            interval = self.config.poll.next(interval);
        }
    }

    /// Fetch, transform and store the stage result, then advance the status
    /// together with the result key in one conditional write.
    async fn finalize(
        &self,
        stage: Stage,
        service: &dyn StageService,
        record: JobRecord,
        output: StageOutput,
        events: &StageEvents<'_>,
    ) -> Result<JobRecord, StageError> {
        let job_id = record.job_id.clone();
        let objects = self.objects.as_ref();

        let raw = match output {
            StageOutput::Location(location) => {
                let location = location.as_str();
                self.with_retry(&job_id, stage, events, move || async move {
                    objects.get(location).await.map_err(ServiceError::from)
                })
                .await?
            }
            StageOutput::Inline(bytes) => bytes,
        };

        let artifact = service.finalize(raw).map_err(StageError::Service)?;
        let key = stage.result_key(&self.output_prefix, &job_id);

        {
            let key = key.as_str();
            let artifact = &artifact;
            self.with_retry(&job_id, stage, events, move || async move {
                objects
                    .put(key, artifact.clone())
                    .await
                    .map_err(ServiceError::from)
            })
            .await?;
        }

        let mut next = record.clone();
        next.set_result_key(stage, key);
        next.status = stage.next_status();
        let written = self.persist(&next, &record, events)?;

        if written.status == JobStatus::Completed {
            metrics::JOBS_FINISHED
                .with_label_values(&[JobStatus::Completed.as_str()])
                .inc();
            if let Some(minutes) = written.minutes() {
                info!(job_id = %job_id, summary_key = %minutes.summary_key, "Job completed");
                events.push(AuditEvent::JobCompleted {
                    job_id: job_id.clone(),
                    transcript_key: minutes.transcript_key,
                    sentiment_key: minutes.sentiment_key,
                    summary_key: minutes.summary_key,
                });
            }
        }

        Ok(written)
    }

    /// Conditional write of `next` over `prior`.
    fn persist(
        &self,
        next: &JobRecord,
        prior: &JobRecord,
        events: &StageEvents<'_>,
    ) -> Result<JobRecord, StageError> {
        let written = self.store.put(next, prior.status)?;

        if written.status != prior.status {
            debug!(job_id = %written.job_id, from = %prior.status, to = %written.status, "Status changed");
            events.push(AuditEvent::JobStatusChanged {
                job_id: written.job_id.clone(),
                from_status: prior.status.to_string(),
                to_status: written.status.to_string(),
            });
        }

        Ok(written)
    }

    /// Run `op`, retrying transient errors with exponential backoff.
    ///
    /// The lease is renewed before every attempt, so it only has to outlive
    /// a single call plus one backoff delay.
    async fn with_retry<T, F, Fut>(
        &self,
        job_id: &str,
        stage: Stage,
        events: &StageEvents<'_>,
        mut op: F,
    ) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let policy = self.config.retry_for(stage);
        let mut attempt = 1;

        loop {
            if !self
                .store
                .renew_lease(job_id, &self.instance_id, self.config.lease_ttl())?
            {
                return Err(StageError::LeaseLost);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt >= policy.max_attempts {
                        return Err(StageError::RetriesExhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        job_id = %job_id,
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient error, retrying"
                    );
                    metrics::STAGE_RETRIES
                        .with_label_values(&[stage.as_str()])
                        .inc();
                    events.push(AuditEvent::StageRetried {
                        job_id: job_id.to_string(),
                        stage: stage.to_string(),
                        retry: attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(StageError::Service(e)),
            }
        }
    }

    /// Record a stage failure as the job's terminal status.
    ///
    /// Returns `None` without writing when the stage's finalize write has
    /// already committed; the run then carries on with the next stage.
    async fn fail(
        &self,
        job_id: &str,
        stage: Stage,
        err: StageError,
    ) -> Result<Option<RunOutcome>, OrchestratorError> {
        let current = self.reload(job_id)?;
        if current.status.is_terminal() {
            return Ok(Some(RunOutcome::Skipped(current)));
        }
        if current.status.pending_stage() != Some(stage) {
            warn!(
                job_id = %job_id,
                stage = %stage,
                status = %current.status,
                error = %err,
                "Stage already committed, not failing it"
            );
            return Ok(None);
        }

        let mut failed = current.clone();
        failed.status = JobStatus::Failed;
        failed.failed_stage = Some(stage);
        failed.error_detail = Some(err.to_string());

        match self.store.put(&failed, current.status) {
            Ok(written) => {
                error!(job_id = %job_id, stage = %stage, error = %err, "Job failed");
                metrics::JOBS_FINISHED
                    .with_label_values(&[JobStatus::Failed.as_str()])
                    .inc();
                self.emit(AuditEvent::JobStatusChanged {
                    job_id: job_id.to_string(),
                    from_status: current.status.to_string(),
                    to_status: JobStatus::Failed.to_string(),
                })
                .await;
                self.emit(AuditEvent::JobFailed {
                    job_id: job_id.to_string(),
                    stage: stage.to_string(),
                    error: err.to_string(),
                })
                .await;
                Ok(Some(RunOutcome::Finished(written)))
            }
            Err(JobStoreError::ConflictingStatus { .. } | JobStoreError::InvalidTransition { .. }) => {
                Ok(Some(RunOutcome::Skipped(self.reload(job_id)?)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
