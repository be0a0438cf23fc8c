//! Text generation backend trait and Ollama implementation.
//!
//! Uses the `/api/chat` endpoint, which properly separates thinking output
//! from the final response for reasoning models. The pipeline holds two
//! instances of this backend: a larger analysis model for extraction and
//! specialized analyses, and a smaller scoring model for per-question scores.

use async_trait::async_trait;
use decklens_core::{defaults, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backend for prompt-based text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response with no system prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a response with an explicit system prompt.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate a response constrained to valid JSON output.
    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Ollama-based generation backend.
pub struct OllamaGenerationBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaGenerationBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            timeout_secs: defaults::GENERATION_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Create from environment variables, reading the model name from the
    /// given variable. Returns None if it is not set.
    pub fn from_env(model_env: &str) -> Option<Self> {
        let model = std::env::var(model_env).ok()?;
        if model.is_empty() {
            return None;
        }
        let base_url = std::env::var(defaults::ENV_OLLAMA_URL)
            .unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        Some(Self::new(base_url, model))
    }

    async fn generate_internal(
        &self,
        system: &str,
        prompt: &str,
        format: Option<serde_json::Value>,
    ) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        // Suppress chain-of-thought for JSON-constrained calls; reasoning
        // models otherwise leak it into structured output.
        let think = if format.is_some() { Some(false) } else { None };
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format,
            think,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            subsystem = "inference",
            component = "generation",
            model = %self.model,
            prompt_len = prompt.len(),
            response_len = content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > 30000 {
            warn!(
                duration_ms = elapsed,
                prompt_len = prompt.len(),
                slow = true,
                "Slow generation call"
            );
        }
        Ok(content)
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Ollama format enforcement. Set to `"json"` for guaranteed valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    /// Disable thinking for models that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl GenerationBackend for OllamaGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_internal("", prompt, None).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_internal(system, prompt, None).await
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_internal(system, prompt, Some(serde_json::json!("json")))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "message": { "role": "assistant", "content": content }
        })
    }

    #[test]
    fn test_chat_request_omits_optional_fields() {
        let request = ChatRequest {
            model: "qwen3".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            stream: false,
            format: None,
            think: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("format"));
        assert!(!json.contains("think"));
    }

    #[tokio::test]
    async fn test_generate_with_system_sends_both_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    { "role": "system", "content": "You are an analyst." },
                    { "role": "user", "content": "Summarize." }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("Summary.")))
            .mount(&server)
            .await;

        let backend = OllamaGenerationBackend::new(server.uri(), "qwen3".to_string());
        let out = backend
            .generate_with_system("You are an analyst.", "Summarize.")
            .await
            .unwrap();
        assert_eq!(out, "Summary.");
    }

    #[tokio::test]
    async fn test_generate_json_sets_format_and_disables_thinking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "format": "json",
                "think": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{\"ok\":true}")))
            .mount(&server)
            .await;

        let backend = OllamaGenerationBackend::new(server.uri(), "qwen3".to_string());
        let out = backend.generate_json("", "Extract metadata").await.unwrap();
        assert_eq!(out, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_generate_error_on_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model missing"))
            .mount(&server)
            .await;

        let backend = OllamaGenerationBackend::new(server.uri(), "qwen3".to_string());
        let err = backend.generate("hello").await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
