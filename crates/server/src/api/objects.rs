//! Object store access.
//!
//! An upload through `PUT` raises the same object-created notification an
//! external store would, so a local deployment needs no event bus.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use minutes_core::{ObjectCreatedEvent, StorageError};

use super::events::{self, Disposition};
use crate::state::AppState;

/// Response for a stored object
#[derive(Debug, Serialize)]
pub struct PutObjectResponse {
    pub key: String,
    pub size: usize,
    /// What the object-created notification did, absent if it could not be
    /// processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Disposition>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ObjectErrorResponse {
    pub error: String,
}

fn storage_error(e: StorageError) -> Response {
    let status = match e {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
        StorageError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ObjectErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// Store an object and notify the trigger binding
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let size = body.len();
    if let Err(e) = state.objects().put(&key, body.to_vec()).await {
        return storage_error(e);
    }

    let trigger = state.binding().config();
    let event = ObjectCreatedEvent::new(
        trigger.source.clone(),
        trigger.detail_type.clone(),
        trigger.bucket.clone(),
        key.clone(),
    );
    let notification = match events::notify(&state, &event).await {
        Ok(disposition) => Some(disposition),
        Err(response) => {
            warn!(key = %key, status = %response.status(), "Upload notification not processed");
            None
        }
    };

    (
        StatusCode::CREATED,
        Json(PutObjectResponse {
            key,
            size,
            notification,
        }),
    )
        .into_response()
}

/// Read an object
pub async fn get_object(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.objects().get(&key).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}
