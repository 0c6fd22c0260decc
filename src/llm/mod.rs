//! Completion Backends
//!
//! A [`CompletionBackend`] turns a prompt into text. The translator only sees
//! the trait; which HTTP service sits behind it is decided once at bootstrap by
//! [`backend_from_config`].

pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{MaetrikError, Result};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Sampling knobs passed along with a prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend identifier, e.g. `ollama`
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<CompletionResult>;

    /// Whether the service answers; never errors
    async fn health_check(&self) -> bool {
        true
    }
}

/// Build the backend named by `config.driver`
pub fn backend_from_config(config: &LlmConfig) -> Result<Arc<dyn CompletionBackend>> {
    let backend: Arc<dyn CompletionBackend> = match config.driver.as_str() {
        ollama::NAME => Arc::new(OllamaBackend::new(
            config.model.clone(),
            config.base_url.clone(),
        )?),
        openai::NAME => Arc::new(OpenAiBackend::new(
            config.model.clone(),
            config.base_url.clone(),
            config.api_key.clone(),
        )?),
        other => {
            return Err(MaetrikError::config_error(format!(
                "Unknown LLM driver '{other}' (expected 'ollama' or 'openai')"
            )))
        }
    };
    tracing::debug!(driver = backend.name(), "Completion backend configured");
    Ok(backend)
}

/// Shared HTTP client construction for the backends
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| MaetrikError::completion_failed(format!("Failed to create HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(driver: &str) -> LlmConfig {
        LlmConfig { driver: driver.to_string(), ..LlmConfig::default() }
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(backend_from_config(&llm("ollama")).ok().unwrap().name(), "ollama");
        assert_eq!(backend_from_config(&llm("openai")).ok().unwrap().name(), "openai");

        let err = backend_from_config(&llm("bard")).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("bard"));
    }

    #[test]
    fn test_options_serialize_sparse() {
        let options = CompletionOptions { temperature: Some(0.1), ..Default::default() };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json, serde_json::json!({"temperature": 0.1f32}));
    }
}
