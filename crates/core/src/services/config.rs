//! External service configuration.

use serde::{Deserialize, Serialize};

/// Default summary prompt. `{transcript}`, `{sentiment}` and `{source_key}`
/// are substituted before the call.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are given the transcript of a meeting \
recorded in {source_key} and an automated sentiment analysis of it.\n\n\
Write meeting minutes in Markdown with these sections: Summary, Decisions, \
Action Items (with owners when named), Open Questions, Overall Tone.\n\n\
<transcript>\n{transcript}\n</transcript>\n\n<sentiment>\n{sentiment}\n</sentiment>\n";

/// All external services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub transcription: JobServiceConfig,
    #[serde(default)]
    pub sentiment: JobServiceConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// An HTTP start/describe job service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobServiceConfig {
    /// Base URL. Jobs are started at `{url}/jobs`.
    #[serde(default)]
    pub url: String,

    /// Language hint passed with every job.
    #[serde(default = "default_language_code")]
    pub language_code: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            language_code: default_language_code(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// The text-generation (Messages API) service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// API key. Reported only as configured/not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// System instructions sent with every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// User prompt template.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            system_prompt: None,
            prompt_template: default_prompt_template(),
        }
    }
}
