//! Shared harness for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use minutes_core::{
    audit::{create_audit_system, AuditFilter, AuditHandle, AuditRecord, AuditStore, SqliteAuditStore},
    job::{JobRecord, JobStore, SqliteJobStore},
    orchestrator::{Orchestrator, OrchestratorConfig},
    services::DEFAULT_PROMPT_TEMPLATE,
    stage::{PromptTemplate, StageTable},
    storage::{MemoryObjectStore, ObjectStore},
    testing::{fixtures, MockJobService, MockTextGenerator},
    trigger::derive_job_id,
};

pub const BUCKET: &str = "minutes";
pub const WATCHED_PREFIX: &str = "meetings/";
pub const OUTPUT_PREFIX: &str = "minutes-output/";
pub const SOURCE_KEY: &str = "meetings/2024-01-01.wav";
pub const TRANSCRIPT: &str = "Alice: let's ship on Friday. Bob: agreed.";
pub const SUMMARY: &str = "# Minutes\n\n- Ship on Friday (Alice)\n";

/// All dependencies of an orchestrator, with mocks for the services.
pub struct TestHarness {
    pub store: Arc<SqliteJobStore>,
    pub objects: MemoryObjectStore,
    pub transcription: Arc<MockJobService>,
    pub sentiment: Arc<MockJobService>,
    pub generator: Arc<MockTextGenerator>,
    pub audit_store: Arc<SqliteAuditStore>,
    pub audit: AuditHandle,
    _temp_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteJobStore::new(&temp_dir.path().join("jobs.db")).expect("Failed to create job store"),
        );
        let audit_store = Arc::new(SqliteAuditStore::in_memory().expect("Failed to create audit store"));
        let (audit, writer) = create_audit_system(audit_store.clone(), 256);
        tokio::spawn(writer.run());

        let objects = MemoryObjectStore::new();
        let transcription = Arc::new(MockJobService::new("transcription", objects.clone()));
        let sentiment = Arc::new(MockJobService::new("sentiment", objects.clone()));
        let generator = Arc::new(MockTextGenerator::new());

        transcription
            .set_output(fixtures::transcription_json(TRANSCRIPT))
            .await;
        sentiment.set_output(fixtures::sentiment_json("POSITIVE")).await;
        generator.set_summary(SUMMARY).await;

        let harness = Self {
            store,
            objects,
            transcription,
            sentiment,
            generator,
            audit_store,
            audit,
            _temp_dir: temp_dir,
        };
        harness.upload(SOURCE_KEY).await;
        harness
    }

    /// Put a fake recording into the object store.
    pub async fn upload(&self, key: &str) {
        self.objects
            .put(key, b"RIFF....WAVEfmt ".to_vec())
            .await
            .expect("Failed to upload source");
    }

    pub fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        self.orchestrator_with_audit(config, Some(self.audit.clone()))
    }

    /// Orchestrator reporting to `audit` instead of the harness audit store.
    pub fn orchestrator_with_audit(
        &self,
        config: OrchestratorConfig,
        audit: Option<AuditHandle>,
    ) -> Orchestrator {
        let stages = StageTable::from_services(
            self.transcription.clone(),
            self.sentiment.clone(),
            self.generator.clone(),
            PromptTemplate::new(DEFAULT_PROMPT_TEMPLATE, None),
        );

        Orchestrator::new(
            config,
            OUTPUT_PREFIX,
            self.store.clone(),
            Arc::new(self.objects.clone()),
            stages,
            audit,
        )
    }

    pub fn get(&self, job_id: &str) -> JobRecord {
        self.store
            .get(job_id)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    /// Wait until the job satisfies `pred`.
    pub async fn wait_for_job<F>(&self, job_id: &str, pred: F) -> JobRecord
    where
        F: Fn(&JobRecord) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(record) = self.store.get(job_id).expect("Failed to read job") {
                if pred(&record) {
                    return record;
                }
            }
            assert!(Instant::now() < deadline, "Timed out waiting for job {}", job_id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until at least `count` audit records of `event_type` exist for
    /// the job, then return them oldest first.
    pub async fn wait_for_history(
        &self,
        job_id: &str,
        event_type: &str,
        count: usize,
    ) -> Vec<AuditRecord> {
        let filter = AuditFilter::new()
            .with_job_id(job_id)
            .with_event_type(event_type)
            .oldest_first();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let records = self.audit_store.query(&filter).expect("Failed to query audit");
            if records.len() >= count {
                return records;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {} {} events of job {}",
                count,
                event_type,
                job_id
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn job_id_for(key: &str) -> String {
    derive_job_id(BUCKET, key, WATCHED_PREFIX)
}
