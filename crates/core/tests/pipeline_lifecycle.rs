//! Pipeline lifecycle integration tests.
//!
//! These tests drive a job through the orchestrator with mock services:
//! PENDING -> TRANSCRIBING -> ANALYZING_SENTIMENT -> SUMMARIZING -> COMPLETED

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{job_id_for, TestHarness, OUTPUT_PREFIX, SOURCE_KEY, SUMMARY, TRANSCRIPT};
use minutes_core::{
    audit::{AuditEvent, AuditHandle},
    job::{JobStatus, JobStore, Stage},
    orchestrator::RunOutcome,
    services::ServiceError,
    storage::ObjectStore,
    testing::{fixtures, MockBehavior},
};

#[tokio::test]
async fn test_happy_path_produces_minutes() {
    let h = TestHarness::new().await;
    h.transcription.set_polls_until_done(2).await;
    h.sentiment.set_polls_until_done(1).await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();

    let record = match outcome {
        RunOutcome::Finished(record) => record,
        other => panic!("expected finished, got {:?}", other),
    };
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.error_detail.is_none());
    assert_eq!(record.attempt, 1);

    let minutes = record.minutes().expect("completed job exposes minutes");
    assert_eq!(
        minutes.transcript_key,
        format!("{}{}/transcript.txt", OUTPUT_PREFIX, job_id)
    );
    assert_eq!(
        minutes.summary_key,
        format!("{}{}/summary.md", OUTPUT_PREFIX, job_id)
    );

    // Every key resolves.
    let transcript = h.objects.get(&minutes.transcript_key).await.unwrap();
    assert_eq!(String::from_utf8(transcript).unwrap(), TRANSCRIPT);
    let sentiment = h.objects.get(&minutes.sentiment_key).await.unwrap();
    assert_eq!(sentiment, fixtures::sentiment_json("POSITIVE"));
    let summary = h.objects.get(&minutes.summary_key).await.unwrap();
    assert_eq!(String::from_utf8(summary).unwrap(), SUMMARY);

    assert_eq!(h.transcription.start_count().await, 1);
    assert_eq!(h.sentiment.start_count().await, 1);
    assert_eq!(h.generator.invocation_count().await, 1);
}

#[tokio::test]
async fn test_stage_inputs_and_job_names() {
    let h = TestHarness::new().await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    let record = h.get(&job_id);

    let starts = h.transcription.recorded_starts().await;
    assert_eq!(starts[0].input_key, SOURCE_KEY);
    assert_eq!(starts[0].job_name, format!("{}-transcription-1", job_id));
    assert_eq!(record.transcription_handle.as_deref(), Some(starts[0].handle.as_str()));

    let starts = h.sentiment.recorded_starts().await;
    assert_eq!(Some(starts[0].input_key.as_str()), record.transcript_key.as_deref());
    assert_eq!(starts[0].job_name, format!("{}-sentiment-1", job_id));

    let prompts = h.generator.recorded_prompts().await;
    assert!(prompts[0].prompt.contains(TRANSCRIPT));
    assert!(prompts[0].prompt.contains("POSITIVE"));
    assert!(prompts[0].prompt.contains(SOURCE_KEY));
}

#[tokio::test]
async fn test_status_path_is_monotonic() {
    let h = TestHarness::new().await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();

    let history = h.wait_for_history(&job_id, "job_status_changed", 4).await;
    let path: Vec<(String, String)> = history
        .into_iter()
        .map(|r| match r.data {
            AuditEvent::JobStatusChanged {
                from_status,
                to_status,
                ..
            } => (from_status, to_status),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();

    let expected = [
        ("PENDING", "TRANSCRIBING"),
        ("TRANSCRIBING", "ANALYZING_SENTIMENT"),
        ("ANALYZING_SENTIMENT", "SUMMARIZING"),
        ("SUMMARIZING", "COMPLETED"),
    ];
    assert_eq!(path.len(), expected.len());
    for ((from, to), (want_from, want_to)) in path.iter().zip(expected) {
        assert_eq!(from, want_from);
        assert_eq!(to, want_to);
    }
}

#[tokio::test]
async fn test_redelivery_after_completed_does_not_mutate() {
    let h = TestHarness::new().await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    let before = h.get(&job_id);

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert!(matches!(outcome, RunOutcome::AlreadyTerminal(_)));

    let after = h.get(&job_id);
    assert_eq!(before, after);
    assert_eq!(h.transcription.start_count().await, 1);
    assert_eq!(h.sentiment.start_count().await, 1);
    assert_eq!(h.generator.invocation_count().await, 1);
}

#[tokio::test]
async fn test_restart_mid_pipeline_does_not_restart_completed_stage() {
    let h = TestHarness::new().await;
    h.sentiment.set_behavior(MockBehavior::Hang).await;
    let orchestrator = Arc::new(h.orchestrator(fixtures::fast_orchestrator_config()));
    let job_id = job_id_for(SOURCE_KEY);

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, SOURCE_KEY).await })
    };

    // Sentiment submitted and still running.
    let mid = h.wait_for_job(&job_id, |r| r.sentiment_handle.is_some()).await;
    assert_eq!(mid.status, JobStatus::AnalyzingSentiment);
    assert!(mid.transcript_key.is_some());

    // Kill the run.
    task.abort();
    let _ = task.await;

    h.sentiment.set_behavior(MockBehavior::Succeed).await;
    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();

    assert_eq!(outcome.record().status, JobStatus::Completed);
    assert_eq!(h.transcription.start_count().await, 1);
    // The persisted handle was polled, not re-submitted.
    assert_eq!(h.sentiment.start_count().await, 1);

    let resumed = h.wait_for_history(&job_id, "stage_resumed", 1).await;
    assert!(matches!(
        &resumed[0].data,
        AuditEvent::StageResumed { stage, .. } if stage == "sentiment"
    ));
}

#[tokio::test]
async fn test_stage_timeout_fails_job() {
    let h = TestHarness::new().await;
    h.transcription.set_behavior(MockBehavior::Hang).await;
    let mut config = fixtures::fast_orchestrator_config();
    config.stages.transcription.timeout_ms = Some(100);
    let orchestrator = h.orchestrator(config);
    let job_id = job_id_for(SOURCE_KEY);

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    let record = outcome.into_record();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failed_stage, Some(Stage::Transcription));
    let detail = record.error_detail.expect("failed job has error detail");
    assert!(detail.contains("timed out after 100ms"), "{}", detail);
    assert!(record.transcript_key.is_none());
    assert!(record.sentiment_key.is_none());
    assert!(record.summary_key.is_none());
    assert_eq!(h.sentiment.start_count().await, 0);
}

#[tokio::test]
async fn test_slow_audit_writer_does_not_fail_committed_stage() {
    let h = TestHarness::new().await;

    // A tiny audit channel nobody reads until well past every stage budget.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<minutes_core::audit::AuditEventEnvelope>(3);
    let reader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        let mut events = Vec::new();
        while let Some(envelope) = rx.recv().await {
            events.push(envelope.event);
        }
        events
    });

    let mut config = fixtures::fast_orchestrator_config();
    config.stages.transcription.timeout_ms = Some(300);
    config.stages.sentiment.timeout_ms = Some(300);
    config.stages.summary.timeout_ms = Some(300);
    let orchestrator = h.orchestrator_with_audit(config, Some(AuditHandle::new(tx)));
    let job_id = job_id_for(SOURCE_KEY);

    let record = orchestrator
        .run(&job_id, SOURCE_KEY)
        .await
        .unwrap()
        .into_record();

    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.failed_stage.is_none());
    assert!(record.error_detail.is_none());
    assert_eq!(h.transcription.start_count().await, 1);
    assert_eq!(h.sentiment.start_count().await, 1);

    // Held events still arrive, in order.
    drop(orchestrator);
    let events = reader.await.unwrap();
    assert!(!events
        .iter()
        .any(|e| matches!(e, AuditEvent::JobFailed { .. })));
    let statuses: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AuditEvent::JobStatusChanged { to_status, .. } => Some(to_status.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        ["TRANSCRIBING", "ANALYZING_SENTIMENT", "SUMMARIZING", "COMPLETED"]
    );
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = TestHarness::new().await;
    h.transcription
        .push_start_error(ServiceError::Transient("throttled".to_string()))
        .await;
    h.sentiment
        .push_poll_error(ServiceError::Transient("503".to_string()))
        .await;
    h.generator
        .push_error(ServiceError::Transient("overloaded".to_string()))
        .await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();

    assert_eq!(outcome.record().status, JobStatus::Completed);
    assert_eq!(h.transcription.start_count().await, 1);
    assert_eq!(h.generator.invocation_count().await, 2);
    h.wait_for_history(&job_id, "stage_retried", 3).await;
}

#[tokio::test]
async fn test_retries_exhausted_fails_job() {
    let h = TestHarness::new().await;
    for _ in 0..3 {
        h.transcription
            .push_start_error(ServiceError::Transient("connection reset".to_string()))
            .await;
    }
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let record = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();

    assert_eq!(record.status, JobStatus::Failed);
    let detail = record.error_detail.unwrap();
    assert!(detail.contains("gave up after 3 attempts"), "{}", detail);
    assert_eq!(h.transcription.start_count().await, 0);
}

#[tokio::test]
async fn test_permanent_error_fails_immediately() {
    let h = TestHarness::new().await;
    h.generator
        .push_error(ServiceError::Permanent("prompt rejected".to_string()))
        .await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let record = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failed_stage, Some(Stage::Summary));
    assert!(record.error_detail.unwrap().contains("prompt rejected"));
    // Completed stages keep their results; the failed one has none.
    assert!(record.transcript_key.is_some());
    assert!(record.sentiment_key.is_some());
    assert!(record.summary_key.is_none());
    assert_eq!(h.generator.invocation_count().await, 1);
}

#[tokio::test]
async fn test_plain_text_transcription_output_passes_through() {
    let h = TestHarness::new().await;
    h.transcription.set_output("just words, no JSON").await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let record = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();

    assert_eq!(record.status, JobStatus::Completed);
    let transcript_key = record.transcript_key.as_deref().unwrap();
    assert_eq!(
        h.objects.get_string(transcript_key).await.as_deref(),
        Some("just words, no JSON")
    );
    let prompts = h.generator.recorded_prompts().await;
    assert!(prompts[0].prompt.contains("just words, no JSON"));
}

#[tokio::test]
async fn test_external_failure_then_event_redrive() {
    let h = TestHarness::new().await;
    h.sentiment
        .set_behavior(MockBehavior::Fail("unsupported language".to_string()))
        .await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    let failed = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failed_stage, Some(Stage::Sentiment));
    assert!(failed.error_detail.unwrap().contains("unsupported language"));

    // A new event for the same object reopens the job at the failed stage.
    h.sentiment.set_behavior(MockBehavior::Succeed).await;
    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    let record = outcome.into_record();

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempt, 2);
    assert_eq!(h.transcription.start_count().await, 1);

    let starts = h.sentiment.recorded_starts().await;
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].job_name, format!("{}-sentiment-2", job_id));

    let redriven = h.wait_for_history(&job_id, "job_redriven", 1).await;
    assert!(matches!(
        &redriven[0].data,
        AuditEvent::JobRedriven { trigger, attempt: 2, .. } if trigger == "event"
    ));
}

#[tokio::test]
async fn test_event_redrive_disabled_leaves_failed_job() {
    let h = TestHarness::new().await;
    h.transcription
        .set_behavior(MockBehavior::Fail("corrupt audio".to_string()))
        .await;
    let mut config = fixtures::fast_orchestrator_config();
    config.redrive_failed_on_event = false;
    let orchestrator = h.orchestrator(config);
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    let before = h.get(&job_id);

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert!(matches!(outcome, RunOutcome::AlreadyTerminal(_)));
    assert_eq!(h.get(&job_id), before);
    assert_eq!(h.transcription.start_count().await, 1);
}

#[tokio::test]
async fn test_operator_redrive_resumes_failed_stage() {
    let h = TestHarness::new().await;
    h.generator
        .push_error(ServiceError::Permanent("invalid request".to_string()))
        .await;
    let mut config = fixtures::fast_orchestrator_config();
    config.redrive_failed_on_event = false;
    let orchestrator = h.orchestrator(config);
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();

    let reopened = orchestrator.reopen(&job_id, "operator").await.unwrap();
    assert_eq!(reopened.status, JobStatus::Summarizing);
    assert_eq!(reopened.attempt, 2);
    assert!(reopened.error_detail.is_none());
    assert!(reopened.failed_stage.is_none());

    let record = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(h.transcription.start_count().await, 1);
    assert_eq!(h.sentiment.start_count().await, 1);
    assert_eq!(h.generator.invocation_count().await, 2);
}

#[tokio::test]
async fn test_reopen_requires_failed_job() {
    let h = TestHarness::new().await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert!(orchestrator.reopen(&job_id, "operator").await.is_err());
    assert!(orchestrator.reopen("no-such-job", "operator").await.is_err());
}

#[tokio::test]
async fn test_lease_held_elsewhere_returns_busy() {
    let h = TestHarness::new().await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);

    h.store.create_if_absent(&job_id, SOURCE_KEY).unwrap();
    assert!(h
        .store
        .try_acquire_lease(&job_id, "other-instance", Duration::from_secs(60))
        .unwrap());

    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Busy(_)));
    assert_eq!(outcome.record().status, JobStatus::Pending);
    assert_eq!(h.transcription.start_count().await, 0);

    // Once released, the job runs.
    h.store.release_lease(&job_id, "other-instance").unwrap();
    let outcome = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert_eq!(outcome.record().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_run_of_same_job_is_busy() {
    let h = TestHarness::new().await;
    h.transcription.set_behavior(MockBehavior::Hang).await;
    let orchestrator = Arc::new(h.orchestrator(fixtures::fast_orchestrator_config()));
    let job_id = job_id_for(SOURCE_KEY);

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, SOURCE_KEY).await })
    };
    h.wait_for_job(&job_id, |r| r.transcription_handle.is_some()).await;

    let second = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert!(matches!(second, RunOutcome::Busy(_)));
    assert_eq!(h.transcription.start_count().await, 1);

    task.abort();
    let _ = task.await;
}

#[tokio::test]
async fn test_interrupt_leaves_job_resumable() {
    let h = TestHarness::new().await;
    h.transcription.set_behavior(MockBehavior::Hang).await;
    let orchestrator = Arc::new(h.orchestrator(fixtures::fast_orchestrator_config()));
    let job_id = job_id_for(SOURCE_KEY);

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, SOURCE_KEY).await })
    };
    h.wait_for_job(&job_id, |r| r.transcription_handle.is_some()).await;

    orchestrator.interrupt();
    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Interrupted(_)));
    assert_eq!(outcome.record().status, JobStatus::Transcribing);
    assert!(outcome.record().error_detail.is_none());

    orchestrator.resume();
    h.transcription.set_behavior(MockBehavior::Succeed).await;
    let record = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(h.transcription.start_count().await, 1);
}

#[tokio::test]
async fn test_distinct_jobs_run_concurrently() {
    let h = TestHarness::new().await;
    h.generator.set_delay(Duration::from_millis(300)).await;
    let other_key = "meetings/2024-01-02.wav";
    h.upload(other_key).await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let first = job_id_for(SOURCE_KEY);
    let second = job_id_for(other_key);

    let started = Instant::now();
    let (a, b) = tokio::join!(
        orchestrator.run(&first, SOURCE_KEY),
        orchestrator.run(&second, other_key)
    );
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap().record().status, JobStatus::Completed);
    assert_eq!(b.unwrap().record().status, JobStatus::Completed);
    assert!(
        elapsed < Duration::from_millis(550),
        "jobs were serialized: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_updated_at_strictly_increases() {
    let h = TestHarness::new().await;
    h.sentiment.set_behavior(MockBehavior::Hang).await;
    let orchestrator = Arc::new(h.orchestrator(fixtures::fast_orchestrator_config()));
    let job_id = job_id_for(SOURCE_KEY);

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, SOURCE_KEY).await })
    };
    let mid = h.wait_for_job(&job_id, |r| r.sentiment_handle.is_some()).await;
    task.abort();
    let _ = task.await;

    h.sentiment.set_behavior(MockBehavior::Succeed).await;
    let done = orchestrator.run(&job_id, SOURCE_KEY).await.unwrap().into_record();

    assert!(mid.updated_at > mid.created_at);
    assert!(done.updated_at > mid.updated_at);
    assert_eq!(done.created_at, mid.created_at);
}
