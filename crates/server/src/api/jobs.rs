//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use minutes_core::{
    AuditFilter, AuditRecord, JobFilter, JobRecord, JobStatus, JobStoreError, OrchestratorError,
};

use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

/// Upper bound on history entries returned for one job
const MAX_HISTORY: i64 = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status (e.g. "FAILED")
    pub status: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// The artifact set of a completed job, dereferenced
#[derive(Debug, Serialize)]
pub struct MinutesResponse {
    pub job_id: String,
    pub source_key: String,
    pub transcript_key: String,
    pub sentiment_key: String,
    pub summary_key: String,
    pub transcript: String,
    /// Sentiment document as returned by the service (a string if it is not
    /// JSON)
    pub sentiment: Value,
    pub summary: String,
}

/// A job's audit history, oldest first
#[derive(Debug, Serialize)]
pub struct JobHistoryResponse {
    pub job_id: String,
    pub events: Vec<AuditRecord>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

type JobError = (StatusCode, Json<JobErrorResponse>);

fn job_error(code: StatusCode, error: impl Into<String>) -> JobError {
    (
        code,
        Json(JobErrorResponse {
            error: error.into(),
            status: None,
        }),
    )
}

fn load_job(state: &AppState, id: &str) -> Result<JobRecord, JobError> {
    match state.job_store().get(id) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(job_error(
            StatusCode::NOT_FOUND,
            format!("Job not found: {}", id),
        )),
        Err(e) => Err(job_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to get job: {}", e),
        )),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, JobError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = JobFilter::new();
    if let Some(ref status) = params.status {
        match JobStatus::parse(status) {
            Some(status) => base_filter = base_filter.with_status(status),
            None => {
                return Err(job_error(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown job status: {}", status),
                ))
            }
        }
    }

    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let jobs = state.job_store().list(&query_filter).map_err(|e| {
        job_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list jobs: {}", e),
        )
    })?;

    let total = state.job_store().count(&base_filter).map_err(|e| {
        job_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count jobs: {}", e),
        )
    })?;

    Ok(Json(ListJobsResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

/// Get a job record
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, JobError> {
    load_job(&state, &id).map(Json)
}

/// Read the minutes of a completed job
pub async fn get_minutes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MinutesResponse>, JobError> {
    let record = load_job(&state, &id)?;

    let Some(keys) = record.minutes().filter(|_| record.status == JobStatus::Completed) else {
        return Err((
            StatusCode::CONFLICT,
            Json(JobErrorResponse {
                error: format!("Job {} is not complete", id),
                status: Some(record.status),
            }),
        ));
    };

    let objects = state.objects();
    let read = |key: String| async move {
        objects.get(&key).await.map_err(|e| {
            job_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read {}: {}", key, e),
            )
        })
    };

    let (transcript, sentiment, summary) = futures::try_join!(
        read(keys.transcript_key.clone()),
        read(keys.sentiment_key.clone()),
        read(keys.summary_key.clone()),
    )?;

    let sentiment = serde_json::from_slice(&sentiment)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&sentiment).into_owned()));

    Ok(Json(MinutesResponse {
        job_id: record.job_id,
        source_key: record.source_key,
        transcript_key: keys.transcript_key,
        sentiment_key: keys.sentiment_key,
        summary_key: keys.summary_key,
        transcript: String::from_utf8_lossy(&transcript).into_owned(),
        sentiment,
        summary: String::from_utf8_lossy(&summary).into_owned(),
    }))
}

/// Audit history of a job, oldest first
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobHistoryResponse>, JobError> {
    load_job(&state, &id)?;

    let filter = AuditFilter::new()
        .with_job_id(&id)
        .oldest_first()
        .with_limit(MAX_HISTORY);

    let events = state.audit_store().query(&filter).map_err(|e| {
        job_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query job history: {}", e),
        )
    })?;

    Ok(Json(JobHistoryResponse { job_id: id, events }))
}

/// Reopen a failed job at the stage that failed and queue a run
pub async fn redrive_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobRecord>), JobError> {
    let Some(dispatcher) = state.dispatcher() else {
        return Err(job_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Pipeline not available",
        ));
    };

    match dispatcher.redrive(&id).await {
        Ok(record) => Ok((StatusCode::ACCEPTED, Json(record))),
        Err(OrchestratorError::JobNotFound(_))
        | Err(OrchestratorError::Store(JobStoreError::NotFound(_))) => Err(job_error(
            StatusCode::NOT_FOUND,
            format!("Job not found: {}", id),
        )),
        Err(OrchestratorError::Store(JobStoreError::InvalidTransition { from, .. })) => Err((
            StatusCode::CONFLICT,
            Json(JobErrorResponse {
                error: format!("Only failed jobs can be re-driven; job is {}", from),
                status: Some(from),
            }),
        )),
        Err(e) => Err(job_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to re-drive job: {}", e),
        )),
    }
}
