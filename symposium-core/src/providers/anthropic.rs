//! Anthropic Messages API generation backend.
//!
//! Notable differences from OpenAI-compatible APIs:
//! - Auth via `x-api-key` header (not `Authorization: Bearer`)
//! - Required `anthropic-version` header
//! - The system prompt is a top-level field, not a message
//! - Streaming uses typed SSE events (`content_block_delta`, ...)

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude generation backend.
pub struct AnthropicGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl AnthropicGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| GenerationError::AuthFailed {
                provider: format!("Anthropic: env var '{}' not set", config.api_key_env),
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
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [
                { "role": "user", "content": request.user_prompt },
            ],
        });
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Extract the text of a `content_block_delta` event, if any.
    fn delta_text(data: &Value) -> Option<&str> {
        if data["type"].as_str() != Some("content_block_delta") {
            return None;
        }
        let delta = &data["delta"];
        if delta["type"].as_str() == Some("text_delta") {
            delta["text"].as_str()
        } else {
            None
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => GenerationError::AuthFailed {
                provider: "Anthropic".to_string(),
            },
            429 => GenerationError::RateLimited {
                retry_after_secs: 30,
            },
            529 => GenerationError::Connection {
                message: "Anthropic API overloaded".to_string(),
            },
            500..=528 | 530..=599 => GenerationError::Connection {
                message: format!("Server error {status}: {body}"),
            },
            _ => GenerationError::ApiRequest {
                message: format!("Unexpected status {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/messages", self.base_url);
        debug!(url = %url, model = %self.model, "Sending Anthropic completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
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

        json["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "missing 'content[0].text'".to_string(),
            })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(request, true))
            .send()
            .await
            .map_err(|e| GenerationError::Streaming {
                message: format!("Streaming request failed: {e}"),
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
                let Some(data_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(data) = serde_json::from_str::<Value>(data_str.trim()) else {
                    continue;
                };
                if data["type"].as_str() == Some("message_stop") {
                    return Ok(full_text);
                }
                if let Some(text) = Self::delta_text(&data)
                    && !text.is_empty()
                {
                    full_text.push_str(text);
                    let _ = tx.send(text.to_string()).await;
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

    fn generator_with_env() -> AnthropicGenerator {
        // SAFETY: test-only env mutation, no concurrent readers of this var.
        unsafe { std::env::set_var("SYMPOSIUM_TEST_ANTHROPIC_KEY", "sk-test") };
        let config = GeneratorConfig {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            api_key_env: "SYMPOSIUM_TEST_ANTHROPIC_KEY".into(),
            ..Default::default()
        };
        AnthropicGenerator::new(&config).unwrap()
    }

    #[test]
    fn test_missing_key_fails() {
        let config = GeneratorConfig {
            provider: "anthropic".into(),
            api_key_env: "SYMPOSIUM_TEST_NO_SUCH_KEY".into(),
            ..Default::default()
        };
        assert!(matches!(
            AnthropicGenerator::new(&config),
            Err(GenerationError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let generator = generator_with_env();
        let request = GenerationRequest {
            system_prompt: "You are Walt Whitman.".into(),
            user_prompt: "Sing the body electric.".into(),
            max_tokens: 300,
            temperature: 0.7,
        };
        let body = generator.request_body(&request, false);
        assert_eq!(body["system"], "You are Walt Whitman.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 300);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_delta_text_extraction() {
        let data: Value = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        )
        .unwrap();
        assert_eq!(AnthropicGenerator::delta_text(&data), Some("Hello"));
    }

    #[test]
    fn test_delta_text_ignores_other_events() {
        let data: Value =
            serde_json::from_str(r#"{"type":"message_start","message":{}}"#).unwrap();
        assert_eq!(AnthropicGenerator::delta_text(&data), None);

        let data: Value = serde_json::from_str(
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#,
        )
        .unwrap();
        assert_eq!(AnthropicGenerator::delta_text(&data), None);
    }

    #[test]
    fn test_map_http_error_overloaded() {
        let err = AnthropicGenerator::map_http_error(
            reqwest::StatusCode::from_u16(529).unwrap(),
            "overloaded",
        );
        assert!(matches!(err, GenerationError::Connection { .. }));
    }

    #[test]
    fn test_map_http_error_auth() {
        let err =
            AnthropicGenerator::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, GenerationError::AuthFailed { .. }));
    }
}
