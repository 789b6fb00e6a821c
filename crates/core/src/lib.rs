pub mod audit;
pub mod config;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod services;
pub mod stage;
pub mod storage;
pub mod testing;
pub mod trigger;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig, SanitizedConfig,
};
pub use job::{JobFilter, JobRecord, JobStatus, JobStore, JobStoreError, MinutesKeys, SqliteJobStore, Stage};
pub use orchestrator::{
    Dispatch, JobDispatcher, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorStatus, RunOutcome, StageError,
};
pub use services::{
    AnthropicGenerator, AsyncJobService, HttpJobService, ServiceError, TextGenerationService,
};
pub use stage::{PromptTemplate, StageTable};
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectStore, StorageError};
pub use trigger::{BindOutcome, Invocation, ObjectCreatedEvent, TriggerBinding, TriggerError};
