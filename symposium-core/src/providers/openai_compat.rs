//! OpenAI-compatible generation backend.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any endpoint
//! that follows the OpenAI chat completions API format.

use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::providers::{GenerationRequest, Generator, sse::SseLineBuffer};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// OpenAI-compatible generation backend.
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleGenerator {
    /// Create a new backend from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`. Local endpoints (Ollama, vLLM, LM Studio)
    /// work without a key; a dummy bearer token is used.
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env).ok().or_else(|| {
            if is_local {
                debug!("No API key set for local provider; using dummy bearer token");
                Some("ollama".to_string())
            } else {
                None
            }
        });
        let api_key = api_key.ok_or_else(|| GenerationError::AuthFailed {
            provider: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Parse a single SSE data line. Returns the parsed JSON if valid.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data: ")?;
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    /// Map an HTTP status code to the appropriate GenerationError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => GenerationError::AuthFailed {
                provider: "OpenAI-compatible".to_string(),
            },
            429 => {
                // Best effort: "Rate limit... try again in Xs"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?.get("message")?.as_str().map(String::from)
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(30);
                GenerationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            500..=599 => GenerationError::Connection {
                message: format!("Server error {status}: {body}"),
            },
            _ => GenerationError::ApiRequest {
                message: format!("Unexpected status {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(request, false))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    GenerationError::ApiRequest {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GenerationError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| GenerationError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "missing 'choices[0].message.content'".to_string(),
            })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(request, true))
            .send()
            .await
            .map_err(|e| GenerationError::Streaming {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }

        let mut full_text = String::new();
        let mut buffer = SseLineBuffer::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GenerationError::Streaming {
                message: format!("Failed to read stream: {e}"),
            })?;
            for line in buffer.push(&chunk) {
                if line == "data: [DONE]" {
                    return Ok(full_text);
                }
                if let Some(data) = Self::parse_sse_line(&line)
                    && let Some(content) = data["choices"][0]["delta"]["content"].as_str()
                    && !content.is_empty()
                {
                    full_text.push_str(content);
                    let _ = tx.send(content.to_string()).await;
                }
            }
        }

        Ok(full_text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> GeneratorConfig {
        GeneratorConfig {
            provider: "ollama".into(),
            model: "llama3.1:8b".into(),
            api_key_env: "SYMPOSIUM_TEST_NO_SUCH_KEY".into(),
            base_url: Some("http://127.0.0.1:11434/v1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let generator = OpenAiCompatibleGenerator::new(&local_config()).unwrap();
        assert_eq!(generator.model_name(), "llama3.1:8b");
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let config = GeneratorConfig {
            api_key_env: "SYMPOSIUM_TEST_NO_SUCH_KEY".into(),
            base_url: None,
            ..Default::default()
        };
        assert!(matches!(
            OpenAiCompatibleGenerator::new(&config),
            Err(GenerationError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let generator = OpenAiCompatibleGenerator::new(&local_config()).unwrap();
        let request = GenerationRequest {
            system_prompt: "You are Karl Marx.".into(),
            user_prompt: "What is value?".into(),
            max_tokens: 300,
            temperature: 0.7,
        };
        let body = generator.request_body(&request, false);
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "What is value?");
        assert_eq!(body["max_tokens"], 300);
        assert!(body.get("stream").is_none());

        let body = generator.request_body(&request, true);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_parse_sse_line_token() {
        let line = r#"data: {"id":"chatcmpl-123","choices":[{"delta":{"content":"Hello"}}]}"#;
        let data = OpenAiCompatibleGenerator::parse_sse_line(line).unwrap();
        assert_eq!(data["choices"][0]["delta"]["content"], "Hello");
    }

    #[test]
    fn test_parse_sse_line_done() {
        assert!(OpenAiCompatibleGenerator::parse_sse_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_sse_line_not_data() {
        assert!(OpenAiCompatibleGenerator::parse_sse_line(": keepalive").is_none());
    }

    #[test]
    fn test_map_http_error_auth() {
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "unauthorized",
        );
        assert!(matches!(err, GenerationError::AuthFailed { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limited() {
        let body = r#"{"error":{"message":"Rate limit reached, try again in 7s"}}"#;
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            body,
        );
        match err {
            GenerationError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, 7)
            }
            other => panic!("expected RateLimited, got {other}"),
        }
    }

    #[test]
    fn test_map_http_error_server() {
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream down",
        );
        assert!(matches!(err, GenerationError::Connection { .. }));
    }
}
