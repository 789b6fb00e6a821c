//! Dispatcher lifecycle integration tests: background runs, duplicate
//! suppression, crash recovery and shutdown.

mod common;

use std::sync::Arc;

use common::{job_id_for, TestHarness, SOURCE_KEY};
use minutes_core::{
    job::{JobStatus, JobStore},
    orchestrator::{Dispatch, JobDispatcher},
    services::AsyncJobService,
    testing::{fixtures, MockBehavior},
};

fn dispatcher(h: &TestHarness) -> JobDispatcher {
    JobDispatcher::new(Arc::new(h.orchestrator(fixtures::fast_orchestrator_config())))
}

#[tokio::test]
async fn test_dispatch_before_start_is_rejected() {
    let h = TestHarness::new().await;
    let dispatcher = dispatcher(&h);
    let job_id = job_id_for(SOURCE_KEY);

    assert_eq!(dispatcher.dispatch(&job_id, SOURCE_KEY), Dispatch::NotRunning);
    assert!(h.store.get(&job_id).unwrap().is_none());
}

#[tokio::test]
async fn test_dispatch_runs_job_in_background() {
    let h = TestHarness::new().await;
    let dispatcher = dispatcher(&h);
    dispatcher.start().await;
    let job_id = job_id_for(SOURCE_KEY);

    assert_eq!(dispatcher.dispatch(&job_id, SOURCE_KEY), Dispatch::Spawned);

    let record = h
        .wait_for_job(&job_id, |r| r.status == JobStatus::Completed)
        .await;
    assert!(record.minutes().is_some());

    let status = dispatcher.status();
    assert!(status.running);
    assert_eq!(status.completed_count, 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_duplicate_dispatch_is_suppressed() {
    let h = TestHarness::new().await;
    h.transcription.set_behavior(MockBehavior::Hang).await;
    let dispatcher = dispatcher(&h);
    dispatcher.start().await;
    let job_id = job_id_for(SOURCE_KEY);

    assert_eq!(dispatcher.dispatch(&job_id, SOURCE_KEY), Dispatch::Spawned);
    assert_eq!(
        dispatcher.dispatch(&job_id, SOURCE_KEY),
        Dispatch::AlreadyInFlight
    );

    h.wait_for_job(&job_id, |r| r.transcription_handle.is_some())
        .await;
    assert_eq!(dispatcher.in_flight_count(), 1);
    assert_eq!(h.transcription.start_count().await, 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_start_recovers_unfinished_jobs() {
    let h = TestHarness::new().await;
    let job_id = job_id_for(SOURCE_KEY);

    // A previous process submitted transcription and died.
    let handle = h
        .transcription
        .start_job(SOURCE_KEY, &format!("{}-transcription-1", job_id))
        .await
        .unwrap();
    let (record, _) = h.store.create_if_absent(&job_id, SOURCE_KEY).unwrap();
    let mut submitted = record.clone();
    submitted.status = JobStatus::Transcribing;
    submitted.transcription_handle = Some(handle);
    h.store.put(&submitted, JobStatus::Pending).unwrap();

    let dispatcher = dispatcher(&h);
    let recovered = dispatcher.start().await;
    assert_eq!(recovered, 1);

    h.wait_for_job(&job_id, |r| r.status == JobStatus::Completed)
        .await;
    // Only the start made before the crash.
    assert_eq!(h.transcription.start_count().await, 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_start_does_not_recover_failed_jobs() {
    let h = TestHarness::new().await;
    h.transcription
        .set_behavior(MockBehavior::Fail("corrupt audio".to_string()))
        .await;
    let orchestrator = h.orchestrator(fixtures::fast_orchestrator_config());
    let job_id = job_id_for(SOURCE_KEY);
    orchestrator.run(&job_id, SOURCE_KEY).await.unwrap();
    assert_eq!(h.get(&job_id).status, JobStatus::Failed);

    let dispatcher = dispatcher(&h);
    assert_eq!(dispatcher.start().await, 0);
    assert_eq!(dispatcher.status().failed_count, 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_in_flight_runs() {
    let h = TestHarness::new().await;
    h.transcription.set_behavior(MockBehavior::Hang).await;
    let dispatcher = dispatcher(&h);
    dispatcher.start().await;
    let job_id = job_id_for(SOURCE_KEY);

    dispatcher.dispatch(&job_id, SOURCE_KEY);
    h.wait_for_job(&job_id, |r| r.transcription_handle.is_some())
        .await;

    dispatcher.stop().await;

    assert_eq!(dispatcher.in_flight_count(), 0);
    let record = h.get(&job_id);
    assert_eq!(record.status, JobStatus::Transcribing);
    assert!(record.error_detail.is_none());

    // Restarting resumes the same external job.
    h.transcription.set_behavior(MockBehavior::Succeed).await;
    assert_eq!(dispatcher.start().await, 1);
    h.wait_for_job(&job_id, |r| r.status == JobStatus::Completed)
        .await;
    assert_eq!(h.transcription.start_count().await, 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_redrive_reopens_and_runs() {
    let h = TestHarness::new().await;
    h.sentiment
        .set_behavior(MockBehavior::Fail("timeout upstream".to_string()))
        .await;
    let dispatcher = dispatcher(&h);
    dispatcher.start().await;
    let job_id = job_id_for(SOURCE_KEY);

    dispatcher.dispatch(&job_id, SOURCE_KEY);
    h.wait_for_job(&job_id, |r| r.status == JobStatus::Failed)
        .await;
    // Let the failed run leave the in-flight set.
    while dispatcher.in_flight_count() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    h.sentiment.set_behavior(MockBehavior::Succeed).await;
    let reopened = dispatcher.redrive(&job_id).await.unwrap();
    assert_eq!(reopened.status, JobStatus::AnalyzingSentiment);
    assert_eq!(reopened.attempt, 2);

    let record = h
        .wait_for_job(&job_id, |r| r.status == JobStatus::Completed)
        .await;
    assert_eq!(record.attempt, 2);
    assert_eq!(h.sentiment.start_count().await, 2);

    dispatcher.stop().await;
}
