//! Common test utilities for in-process API testing with mocks.
//!
//! This module provides a test fixture that builds the router with mock
//! services injected, so the full event-to-minutes flow runs without any
//! external infrastructure.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use minutes_core::{
    create_audit_system, services::DEFAULT_PROMPT_TEMPLATE, AuditStore, Config, DatabaseConfig,
    JobDispatcher, JobStore, MemoryObjectStore, ObjectStore, Orchestrator, PromptTemplate,
    SqliteAuditStore, SqliteJobStore, StageTable,
    testing::{MockJobService, MockTextGenerator},
};

/// Re-export fixtures for test convenience
pub use minutes_core::testing::fixtures;

pub const SOURCE_KEY: &str = "meetings/2024-01-01.wav";
pub const TRANSCRIPT: &str = "Alice: the release moves to Friday. Bob: fine by me.";
pub const SUMMARY: &str = "# Minutes\n\n## Decisions\n- Release on Friday\n";

/// Test fixture for in-process API testing with mock dependencies.
///
/// Provides the router plus fully controllable mocks for:
/// - Transcription and sentiment jobs (MockJobService)
/// - Summary generation (MockTextGenerator)
/// - The object store (MemoryObjectStore)
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_upload_starts_job() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .put_bytes("/api/v1/objects/meetings/a.wav", b"RIFF".to_vec())
///         .await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub transcription: Arc<MockJobService>,
    pub sentiment: Arc<MockJobService>,
    pub generator: Arc<MockTextGenerator>,
    pub objects: MemoryObjectStore,
    pub job_store: Arc<SqliteJobStore>,
    /// Absent when the fixture simulates unconfigured services
    pub dispatcher: Option<Arc<JobDispatcher>>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture with a running dispatcher.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            orchestrator: fixtures::fast_orchestrator_config(),
            ..Default::default()
        };

        // Create stores
        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let job_store =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let objects = MemoryObjectStore::new();

        // Create audit system
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);

        // Spawn audit writer
        tokio::spawn(audit_writer.run());

        // Create mocks
        let transcription = Arc::new(MockJobService::new("transcription", objects.clone()));
        let sentiment = Arc::new(MockJobService::new("sentiment", objects.clone()));
        let generator = Arc::new(MockTextGenerator::new());
        transcription
            .set_output(fixtures::transcription_json(TRANSCRIPT))
            .await;
        sentiment.set_output(fixtures::sentiment_json("POSITIVE")).await;
        generator.set_summary(SUMMARY).await;

        let dispatcher = if test_config.pipeline_available {
            let stages = StageTable::from_services(
                transcription.clone(),
                sentiment.clone(),
                generator.clone(),
                PromptTemplate::new(DEFAULT_PROMPT_TEMPLATE, None),
            );
            let orchestrator = Orchestrator::new(
                config.orchestrator.clone(),
                config.storage.output_prefix.clone(),
                Arc::clone(&job_store) as Arc<dyn JobStore>,
                Arc::new(objects.clone()) as Arc<dyn ObjectStore>,
                stages,
                Some(audit_handle.clone()),
            );
            let dispatcher = Arc::new(JobDispatcher::new(Arc::new(orchestrator)));
            if test_config.start_dispatcher {
                dispatcher.start().await;
            }
            Some(dispatcher)
        } else {
            None
        };

        // Create app state with mocks
        let state = Arc::new(minutes_server::state::AppState::new(
            config,
            audit_handle,
            audit_store,
            Arc::clone(&job_store) as Arc<dyn JobStore>,
            Arc::new(objects.clone()) as Arc<dyn ObjectStore>,
            dispatcher.clone(),
        ));

        // Create router
        let router = minutes_server::api::create_router(state);

        Self {
            router,
            transcription,
            sentiment,
            generator,
            objects,
            job_store,
            dispatcher,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.request_raw("POST", path, body.as_bytes().to_vec(), "application/json")
            .await
    }

    /// Send a PUT request with a binary body.
    pub async fn put_bytes(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request_raw("PUT", path, body, "application/octet-stream")
            .await
    }

    /// Send a GET request and return the raw body.
    pub async fn get_bytes(&self, path: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    /// Poll the job endpoint until the job reaches `status`.
    pub async fn wait_for_status(&self, job_id: &str, status: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        let path = format!("/api/v1/jobs/{}", job_id);
        loop {
            let response = self.get(&path).await;
            if response.status == StatusCode::OK && response.body["status"] == status {
                return response.body;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {} to reach {}; last body: {}",
                job_id,
                status,
                response.body
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the dispatcher has no runs in flight.
    pub async fn wait_idle(&self) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while dispatcher.in_flight_count() > 0 {
            assert!(Instant::now() < deadline, "Dispatcher did not go idle");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll the history endpoint until `event_type` shows up for the job.
    pub async fn wait_for_event(&self, job_id: &str, event_type: &str) -> Vec<Value> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let path = format!("/api/v1/jobs/{}/history", job_id);
        loop {
            let response = self.get(&path).await;
            let events = response.body["events"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            if events.iter().any(|e| e["event_type"] == event_type) {
                return events;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {} in history of {}",
                event_type,
                job_id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a request with a raw body and custom content type.
    async fn request_raw(
        &self,
        method: &str,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", content_type)
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Wire up the orchestrator and dispatcher
    pub pipeline_available: bool,
    /// Start the dispatcher so accepted events run
    pub start_dispatcher: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            pipeline_available: true,
            start_dispatcher: true,
        }
    }
}

impl TestConfig {
    /// Dispatcher wired but stopped: events are recorded only.
    pub fn stopped() -> Self {
        Self {
            pipeline_available: true,
            start_dispatcher: false,
        }
    }

    /// No pipeline at all, as when the services are not configured.
    pub fn unavailable() -> Self {
        Self {
            pipeline_available: false,
            start_dispatcher: false,
        }
    }
}

/// Build an object-created event body.
pub fn object_created(key: &str) -> Value {
    serde_json::json!({
        "source": "object-store",
        "detail_type": "ObjectCreated",
        "detail": { "bucket": "minutes", "object_key": key }
    })
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
