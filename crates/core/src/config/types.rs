use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::services::{GenerationConfig, JobServiceConfig, ServicesConfig};
use crate::trigger::TriggerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration (job table and audit log)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("minutes.db")
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory backing the filesystem object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Prefix under which stage artifacts are written
    /// (`{output_prefix}{job_id}/transcript.txt`, ...).
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            output_prefix: default_output_prefix(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("objects")
}

fn default_output_prefix() -> String {
    "minutes-output/".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub trigger: TriggerConfig,
    pub orchestrator: OrchestratorConfig,
    pub services: SanitizedServicesConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServicesConfig {
    pub transcription: JobServiceConfig,
    pub sentiment: JobServiceConfig,
    pub generation: SanitizedGenerationConfig,
}

/// Sanitized generation config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGenerationConfig {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub api_key_configured: bool,
    pub system_prompt_configured: bool,
}

impl From<&GenerationConfig> for SanitizedGenerationConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            api_key_configured: config
                .api_key
                .as_deref()
                .is_some_and(|k| !k.is_empty()),
            system_prompt_configured: config.system_prompt.is_some(),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            trigger: config.trigger.clone(),
            orchestrator: config.orchestrator.clone(),
            services: SanitizedServicesConfig {
                transcription: config.services.transcription.clone(),
                sentiment: config.services.sentiment.clone(),
                generation: SanitizedGenerationConfig::from(&config.services.generation),
            },
        }
    }
}
