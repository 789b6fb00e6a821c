//! Messages API client used for summary generation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::config::GenerationConfig;
use super::traits::TextGenerationService;
use super::types::{GenerationOutput, PromptInputs, ServiceError};

/// Anthropic Messages API client.
pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    model: String,
    api_base: String,
    max_tokens: u32,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::Permanent("Generation API key not configured".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, inputs: PromptInputs) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: inputs.system,
            messages: vec![Message {
                role: "user".to_string(),
                content: inputs.prompt,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn collect_text(response: MessagesResponse) -> Result<GenerationOutput, ServiceError> {
    let text = response
        .content
        .into_iter()
        .filter(|c| c.content_type == "text")
        .map(|c| c.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(ServiceError::Permanent(
            "Generation returned no text".to_string(),
        ));
    }

    Ok(GenerationOutput {
        summary_text: text,
        model: response.model,
    })
}

#[async_trait]
impl TextGenerationService for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, inputs: PromptInputs) -> Result<GenerationOutput, ServiceError> {
        let job_id = inputs.job_id.clone();
        let request = self.build_request(inputs);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            // 529 is the API's "overloaded" status.
            return Err(ServiceError::from_status(status, message));
        }

        let body: MessagesResponse = response.json().await?;
        tracing::debug!(job_id = %job_id, model = %body.model, "Generated summary");
        collect_text(body)
    }
}
