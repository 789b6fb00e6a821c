//! Mock asynchronous job service for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::services::{AsyncJobService, ExternalJob, ServiceError};
use crate::storage::{MemoryObjectStore, ObjectStore};

/// How jobs of a [`MockJobService`] end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Succeed after the configured number of running polls.
    Succeed,
    /// Fail with the reason after the configured number of running polls.
    Fail(String),
    /// Report RUNNING forever.
    Hang,
}

/// A recorded start_job call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStart {
    pub input_key: String,
    pub job_name: String,
    pub handle: String,
}

/// Mock implementation of [`AsyncJobService`].
///
/// Successful jobs write their output into the given object store under
/// `_external/{service}/{handle}.out` and report that key as the output
/// location, the way a real service writes its result into the bucket.
///
/// # Example
///
/// ```rust,ignore
/// let objects = MemoryObjectStore::new();
/// let transcription = MockJobService::new("transcription", objects.clone());
/// transcription.set_output(fixtures::transcription_json("hello")).await;
/// transcription.set_polls_until_done(2).await;
///
/// // ... run the orchestrator ...
///
/// assert_eq!(transcription.start_count().await, 1);
/// ```
pub struct MockJobService {
    name: String,
    objects: MemoryObjectStore,
    output: Arc<RwLock<Vec<u8>>>,
    behavior: Arc<RwLock<MockBehavior>>,
    polls_until_done: Arc<RwLock<u32>>,
    start_errors: Arc<RwLock<VecDeque<ServiceError>>>,
    poll_errors: Arc<RwLock<VecDeque<ServiceError>>>,
    starts: Arc<RwLock<Vec<RecordedStart>>>,
    polls: Arc<RwLock<HashMap<String, u32>>>,
}

impl MockJobService {
    pub fn new(name: impl Into<String>, objects: MemoryObjectStore) -> Self {
        Self {
            name: name.into(),
            objects,
            output: Arc::new(RwLock::new(b"{}".to_vec())),
            behavior: Arc::new(RwLock::new(MockBehavior::Succeed)),
            polls_until_done: Arc::new(RwLock::new(0)),
            start_errors: Arc::new(RwLock::new(VecDeque::new())),
            poll_errors: Arc::new(RwLock::new(VecDeque::new())),
            starts: Arc::new(RwLock::new(Vec::new())),
            polls: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bytes a successful job writes as its result.
    pub async fn set_output(&self, output: impl Into<Vec<u8>>) {
        *self.output.write().await = output.into();
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Number of polls answered with RUNNING before a job settles.
    pub async fn set_polls_until_done(&self, polls: u32) {
        *self.polls_until_done.write().await = polls;
    }

    /// Queue an error for the next start_job call.
    pub async fn push_start_error(&self, error: ServiceError) {
        self.start_errors.write().await.push_back(error);
    }

    /// Queue an error for the next get_job call.
    pub async fn push_poll_error(&self, error: ServiceError) {
        self.poll_errors.write().await.push_back(error);
    }

    /// Successful start_job calls.
    pub async fn recorded_starts(&self) -> Vec<RecordedStart> {
        self.starts.read().await.clone()
    }

    pub async fn start_count(&self) -> usize {
        self.starts.read().await.len()
    }

    /// Total get_job calls that reached a known job.
    pub async fn poll_count(&self) -> u32 {
        self.polls.read().await.values().sum()
    }

    fn output_key(&self, handle: &str) -> String {
        format!("_external/{}/{}.out", self.name, handle)
    }
}

#[async_trait]
impl AsyncJobService for MockJobService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_job(&self, input_key: &str, job_name: &str) -> Result<String, ServiceError> {
        if let Some(error) = self.start_errors.write().await.pop_front() {
            return Err(error);
        }

        let handle = format!("{}-{}", self.name, job_name);
        self.starts.write().await.push(RecordedStart {
            input_key: input_key.to_string(),
            job_name: job_name.to_string(),
            handle: handle.clone(),
        });
        self.polls.write().await.entry(handle.clone()).or_insert(0);

        Ok(handle)
    }

    async fn get_job(&self, handle: &str) -> Result<ExternalJob, ServiceError> {
        if let Some(error) = self.poll_errors.write().await.pop_front() {
            return Err(error);
        }

        let seen = {
            let mut polls = self.polls.write().await;
            let Some(count) = polls.get_mut(handle) else {
                return Err(ServiceError::Permanent(format!("unknown job handle: {}", handle)));
            };
            *count += 1;
            *count
        };

        if seen <= *self.polls_until_done.read().await {
            return Ok(ExternalJob::running());
        }

        let behavior = self.behavior.read().await.clone();
        match behavior {
            MockBehavior::Hang => Ok(ExternalJob::running()),
            MockBehavior::Fail(reason) => Ok(ExternalJob::failed(reason)),
            MockBehavior::Succeed => {
                let key = self.output_key(handle);
                let output = self.output.read().await.clone();
                self.objects
                    .put(&key, output)
                    .await
                    .map_err(ServiceError::from)?;
                Ok(ExternalJob::succeeded(key))
            }
        }
    }
}
