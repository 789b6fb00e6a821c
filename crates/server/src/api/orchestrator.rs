//! Dispatcher API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use minutes_core::OrchestratorStatus;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Dispatcher status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether the pipeline is wired up (services configured)
    pub available: bool,
    /// Identity used for job leases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(flatten)]
    pub status: OrchestratorStatus,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct OrchestratorErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<OrchestratorErrorResponse>);

fn unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(OrchestratorErrorResponse {
            error: "Pipeline not available. Check the services configuration.".to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Get dispatcher status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatusResponse> {
    match state.dispatcher() {
        Some(dispatcher) => Json(OrchestratorStatusResponse {
            available: true,
            instance_id: Some(dispatcher.orchestrator().instance_id().to_string()),
            status: dispatcher.status(),
        }),
        None => Json(OrchestratorStatusResponse {
            available: false,
            instance_id: None,
            status: OrchestratorStatus {
                max_concurrent_jobs: state.config().orchestrator.max_concurrent_jobs,
                ..OrchestratorStatus::default()
            },
        }),
    }
}

/// Start the dispatcher, recovering unfinished jobs if configured to
pub async fn start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let dispatcher = state.dispatcher().ok_or_else(unavailable)?;
    let recovered = dispatcher.start().await;
    Ok(Json(MessageResponse {
        message: format!("Dispatcher started ({} jobs recovered)", recovered),
    }))
}

/// Stop the dispatcher; in-flight runs are interrupted and stay resumable
pub async fn stop(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let dispatcher = state.dispatcher().ok_or_else(unavailable)?;
    dispatcher.stop().await;
    Ok(Json(MessageResponse {
        message: "Dispatcher stopped".to_string(),
    }))
}
