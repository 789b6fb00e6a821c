//! Object-created event intake.
//!
//! Events are bound to a job ID, recorded, and handed to the dispatcher.
//! Delivery is at-least-once; a duplicate maps to the same job and is
//! absorbed by the orchestrator.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use minutes_core::{AuditEvent, BindOutcome, Dispatch, JobStatus, ObjectCreatedEvent};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Response for an accepted event
#[derive(Debug, Serialize)]
pub struct EventAcceptedResponse {
    pub job_id: String,
    pub source_key: String,
    /// Job status when the event was recorded
    pub status: JobStatus,
    /// Whether this event created the job record
    pub created: bool,
    /// "spawned", "already_in_flight" or "not_running"
    pub dispatch: &'static str,
}

/// Response for an event that does not start a job
#[derive(Debug, Serialize)]
pub struct EventIgnoredResponse {
    pub status: &'static str,
    pub reason: String,
}

/// What became of an event that was bound successfully
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Disposition {
    Accepted(EventAcceptedResponse),
    Ignored(EventIgnoredResponse),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct EventErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(EventErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn dispatch_label(dispatch: Dispatch) -> &'static str {
    match dispatch {
        Dispatch::Spawned => "spawned",
        Dispatch::AlreadyInFlight => "already_in_flight",
        Dispatch::NotRunning => "not_running",
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Receive an object-created event
pub async fn receive_event(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome = match state.binding().bind_json(&body) {
        Ok(outcome) => outcome,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match process(&state, outcome).await {
        Ok(accepted @ Disposition::Accepted(_)) => {
            (StatusCode::ACCEPTED, Json(accepted)).into_response()
        }
        Ok(ignored @ Disposition::Ignored(_)) => (StatusCode::OK, Json(ignored)).into_response(),
        Err(response) => response,
    }
}

/// Bind an event raised in-process (local object uploads).
pub(crate) async fn notify(
    state: &AppState,
    event: &ObjectCreatedEvent,
) -> Result<Disposition, Response> {
    let outcome = state.binding().bind(event);
    process(state, outcome).await
}

async fn process(state: &AppState, outcome: BindOutcome) -> Result<Disposition, Response> {
    let invocation = match outcome {
        BindOutcome::Accepted(invocation) => invocation,
        BindOutcome::Ignored(reason) => {
            state
                .audit()
                .emit(AuditEvent::EventIgnored {
                    reason: reason.clone(),
                    source_key: None,
                })
                .await;
            return Ok(Disposition::Ignored(EventIgnoredResponse {
                status: "ignored",
                reason,
            }));
        }
    };

    state
        .audit()
        .emit(AuditEvent::EventReceived {
            job_id: invocation.job_id.clone(),
            bucket: invocation.bucket.clone(),
            source_key: invocation.source_key.clone(),
        })
        .await;

    let Some(dispatcher) = state.dispatcher() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Pipeline not available. Check the services configuration.",
        ));
    };

    let (record, created) = dispatcher
        .orchestrator()
        .register(&invocation.job_id, &invocation.source_key)
        .await
        .map_err(|e| {
            error!(job_id = %invocation.job_id, error = %e, "Failed to record job");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to record job: {}", e),
            )
        })?;

    let dispatch = dispatch_label(dispatcher.dispatch(&invocation.job_id, &invocation.source_key));
    info!(
        job_id = %invocation.job_id,
        source_key = %invocation.source_key,
        created,
        dispatch,
        "Event accepted"
    );

    Ok(Disposition::Accepted(EventAcceptedResponse {
        job_id: invocation.job_id,
        source_key: invocation.source_key,
        status: record.status,
        created,
        dispatch,
    }))
}
