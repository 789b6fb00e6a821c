//! HTTP binding of the start/describe job contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::JobServiceConfig;
use super::traits::AsyncJobService;
use super::types::{ExternalJob, ServiceError};

/// Client for a transcription or sentiment service exposing
/// `POST {url}/jobs` and `GET {url}/jobs/{handle}`.
pub struct HttpJobService {
    name: String,
    client: Client,
    base_url: String,
    language_code: String,
}

#[derive(Debug, Serialize)]
struct StartJobRequest<'a> {
    job_name: &'a str,
    input_key: &'a str,
    language_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartJobResponse {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

impl HttpJobService {
    pub fn new(name: impl Into<String>, config: &JobServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            language_code: config.language_code.clone(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }

    fn job_url(&self, handle: &str) -> String {
        format!("{}/jobs/{}", self.base_url, urlencoding::encode(handle))
    }

    async fn error_from(response: reqwest::Response) -> ServiceError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        ServiceError::from_status(status, message)
    }
}

#[async_trait]
impl AsyncJobService for HttpJobService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_job(&self, input_key: &str, job_name: &str) -> Result<String, ServiceError> {
        let request = StartJobRequest {
            job_name,
            input_key,
            language_code: &self.language_code,
        };

        let response = self.client.post(self.jobs_url()).json(&request).send().await?;
        let status = response.status();

        // A job with this name already exists: an earlier start went through
        // even though its response was lost. The service reports the handle.
        if status == StatusCode::CONFLICT {
            let text = response.text().await.unwrap_or_default();
            return serde_json::from_str::<StartJobResponse>(&text)
                .map(|r| r.handle)
                .map_err(|_| ServiceError::from_status(409, text));
        }

        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: StartJobResponse = response.json().await?;
        debug!(service = %self.name, job_name = %job_name, handle = %body.handle, "Started external job");
        Ok(body.handle)
    }

    async fn get_job(&self, handle: &str) -> Result<ExternalJob, ServiceError> {
        let response = self.client.get(self.job_url(handle)).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(response.json().await?)
    }
}
