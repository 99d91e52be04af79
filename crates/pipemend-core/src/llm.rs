//! Language-model capability consumed by generation, healing and PR text.

use crate::config::LlmConfig;
use crate::error::Result;
use ollama_client::{ClientConfig, GenerateRequest, OllamaClient};
use std::time::Duration;

pub trait LanguageModel: Send + Sync {
    /// Probe the backend. Generation fails fast when this does.
    fn health(&self) -> Result<()>;

    /// Run a single completion and return the raw response text.
    fn generate(&self, request: GenerateRequest) -> Result<String>;
}

impl LanguageModel for OllamaClient {
    fn health(&self) -> Result<()> {
        Ok(self.health_check()?)
    }

    fn generate(&self, request: GenerateRequest) -> Result<String> {
        Ok(OllamaClient::generate(self, &request)?.response)
    }
}

/// Build an Ollama client from the `llm` config section.
pub fn ollama_from_config(cfg: &LlmConfig) -> Result<OllamaClient> {
    Ok(OllamaClient::new(ClientConfig {
        base_url: cfg.base_url.clone(),
        timeout: Duration::from_secs(cfg.timeout_secs),
        max_retries: cfg.max_retries,
        ..ClientConfig::default()
    })?)
}
