//! Google Gemini generation backend.
//!
//! Notable differences from the other backends:
//! - The API key rides in the URL query string
//! - The system prompt is a `systemInstruction` object
//! - Streaming uses the `:streamGenerateContent` endpoint with `?alt=sse`

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

/// Google Gemini generation backend.
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| GenerationError::AuthFailed {
                provider: format!("Gemini: env var '{}' not set", config.api_key_env),
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
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": request.system_prompt }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user_prompt }]
            }],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        })
    }

    /// Extract the text of the first candidate, if any.
    fn candidate_text(data: &Value) -> Option<String> {
        let parts = data["candidates"][0]["content"]["parts"].as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() { None } else { Some(text) }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            400 if body.contains("API_KEY_INVALID") => GenerationError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            401 | 403 => GenerationError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => GenerationError::RateLimited {
                retry_after_secs: 30,
            },
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
impl Generator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        debug!(model = %self.model, "Sending Gemini completion request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
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

        Self::candidate_text(&json).ok_or_else(|| GenerationError::ResponseParse {
            message: "missing 'candidates[0].content.parts' text".to_string(),
        })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
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
                if let Some(text) = Self::candidate_text(&data) {
                    full_text.push_str(&text);
                    let _ = tx.send(text).await;
                }
            }
        }

        Ok(full_text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
