use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minutes_core::{
    create_audit_system, load_config, validate_config, AnthropicGenerator, AsyncJobService,
    AuditEvent, AuditStore, Config, FsObjectStore, HttpJobService, JobDispatcher, JobStore,
    ObjectStore, Orchestrator, PromptTemplate, SqliteAuditStore, SqliteJobStore, StageTable,
    TextGenerationService,
};
use minutes_server::api::create_router;
use minutes_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    let json = std::env::var("MINUTES_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wire the stage services and the orchestrator. Fails when a service
/// cannot be constructed (e.g. no generation API key).
fn build_dispatcher(
    config: &Config,
    job_store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    audit: minutes_core::AuditHandle,
) -> Result<JobDispatcher> {
    let services = &config.services;

    let transcription: Arc<dyn AsyncJobService> = Arc::new(
        HttpJobService::new("transcription", &services.transcription)
            .context("Failed to create transcription client")?,
    );
    let sentiment: Arc<dyn AsyncJobService> = Arc::new(
        HttpJobService::new("sentiment", &services.sentiment)
            .context("Failed to create sentiment client")?,
    );
    let generator: Arc<dyn TextGenerationService> = Arc::new(
        AnthropicGenerator::new(&services.generation)
            .context("Failed to create text generation client")?,
    );
    let prompt = PromptTemplate::new(
        services.generation.prompt_template.clone(),
        services.generation.system_prompt.clone(),
    );

    let stages = StageTable::from_services(transcription, sentiment, generator, prompt);
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        config.storage.output_prefix.clone(),
        job_store,
        objects,
        stages,
        Some(audit),
    );

    Ok(JobDispatcher::new(Arc::new(orchestrator)))
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("MINUTES_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Object store root: {:?}", config.storage.root);

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite audit store
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    // Create SQLite job table
    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Create filesystem object store
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.root));

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);

    // Spawn audit writer task
    let writer_handle = tokio::spawn(audit_writer.run());

    // Emit ServiceStarted event
    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let dispatcher = match build_dispatcher(
        &config,
        Arc::clone(&job_store),
        Arc::clone(&objects),
        audit_handle.clone(),
    ) {
        Ok(dispatcher) => Some(Arc::new(dispatcher)),
        Err(e) => {
            error!("Pipeline unavailable: {:#}", e);
            None
        }
    };

    match &dispatcher {
        Some(d) if config.orchestrator.enabled => {
            let recovered = d.start().await;
            info!(recovered, "Job dispatcher started");
        }
        Some(_) => info!("Orchestrator disabled in config; events are recorded only"),
        None => warn!("Events will be rejected until the services are configured"),
    }

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        audit_handle.clone(),
        audit_store,
        job_store,
        objects,
        dispatcher.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Interrupt in-flight runs; they resume on the next start
    if let Some(ref d) = dispatcher {
        if d.is_running() {
            info!("Stopping job dispatcher...");
            d.stop().await;
        }
    }

    // Emit ServiceStopped event
    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The orchestrator holds an AuditHandle clone; every holder must be
    // dropped before the writer's channel closes.
    drop(dispatcher);
    drop(audit_handle);

    // Wait for writer to finish processing remaining events
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
