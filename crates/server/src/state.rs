use std::sync::Arc;

use minutes_core::{
    AuditHandle, AuditStore, Config, JobDispatcher, JobStore, ObjectStore, SanitizedConfig,
    TriggerBinding,
};

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    job_store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    binding: TriggerBinding,
    dispatcher: Option<Arc<JobDispatcher>>,
}

impl AppState {
    pub fn new(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        job_store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: Option<Arc<JobDispatcher>>,
    ) -> Self {
        let binding = TriggerBinding::new(
            config.trigger.clone(),
            config.storage.output_prefix.clone(),
        );
        Self {
            config,
            audit,
            audit_store,
            job_store,
            objects,
            binding,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.job_store.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn binding(&self) -> &TriggerBinding {
        &self.binding
    }

    /// The job dispatcher, if the pipeline could be wired up.
    pub fn dispatcher(&self) -> Option<&Arc<JobDispatcher>> {
        self.dispatcher.as_ref()
    }
}
