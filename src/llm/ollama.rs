//! Ollama `/api/generate` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{http_client, CompletionBackend, CompletionOptions, CompletionResult, CompletionUsage};
use crate::error::{MaetrikError, Result};

pub const NAME: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_NUM_PREDICT: u32 = 2048;

pub struct OllamaBackend {
    model: String,
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaBackend {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: http_client()?,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<CompletionResult> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                num_predict: options.max_tokens.unwrap_or(DEFAULT_NUM_PREDICT),
                stop: &options.stop_sequences,
            },
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Sending Ollama generate request");
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| MaetrikError::completion_failed(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "Ollama returned an error");
            return Err(MaetrikError::completion_failed(format!(
                "Ollama API error: {status} {text}"
            )));
        }

        let data: GenerateResponse = response.json().await.map_err(|e| {
            MaetrikError::completion_failed(format!("Failed to parse Ollama response: {e}"))
        })?;

        let prompt_tokens = data.prompt_eval_count.unwrap_or(0);
        let completion_tokens = data.eval_count.unwrap_or(0);
        Ok(CompletionResult {
            content: data.response,
            usage: Some(CompletionUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_posts_generate_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "llama3",
                "prompt": "hello",
                "stream": false,
                "options": {"num_predict": 1024}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "world",
                "prompt_eval_count": 3,
                "eval_count": 5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(None, Some(server.uri())).unwrap();
        let options = CompletionOptions { max_tokens: Some(1024), ..Default::default() };
        let result = backend.complete("hello", &options).await.unwrap();

        assert_eq!(result.content, "world");
        assert_eq!(
            result.usage,
            Some(CompletionUsage { prompt_tokens: 3, completion_tokens: 5, total_tokens: 8 })
        );
    }

    #[tokio::test]
    async fn test_missing_counts_default_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(Some("mistral".into()), Some(server.uri())).unwrap();
        let result = backend.complete("p", &CompletionOptions::default()).await.unwrap();
        assert_eq!(result.usage.map(|u| u.total_tokens), Some(0));
        assert_eq!(backend.model(), "mistral");
    }

    #[tokio::test]
    async fn test_http_error_is_completion_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(None, Some(server.uri())).unwrap();
        let err = backend.complete("p", &CompletionOptions::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "COMPLETION_FAILED");
        assert!(err.message().contains("500"));
    }

    #[tokio::test]
    async fn test_health_check_uses_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(None, Some(format!("{}/", server.uri()))).unwrap();
        assert!(backend.health_check().await);

        let unreachable = OllamaBackend::new(None, Some("http://127.0.0.1:9".into())).unwrap();
        assert!(!unreachable.health_check().await);
    }
}
