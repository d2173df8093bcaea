//! Generation backend implementations.
//!
//! Defines the `Generator` capability trait the responder and orchestrator
//! depend on, plus concrete implementations for:
//! - OpenAI-compatible APIs (OpenAI, Ollama, vLLM, LM Studio)
//! - Anthropic Messages API (Claude models)
//! - Google Gemini API
//!
//! Use `create_generator()` to instantiate the configured provider at
//! startup; everything downstream sees only the trait.

pub mod anthropic;
pub mod gemini;
pub mod openai_compat;
pub(crate) mod sse;

use crate::config::{GeneratorConfig, RetryConfig};
use crate::error::GenerationError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

pub use anthropic::AnthropicGenerator;
pub use gemini::GeminiGenerator;
pub use openai_compat::OpenAiCompatibleGenerator;

/// A single generation request: voice prompt, assembled user prompt, and
/// length/format constraints.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            user_prompt: String::new(),
            max_tokens: 300,
            temperature: 0.7,
        }
    }
}

/// Trait for generation backends, supporting full and streaming completions.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Perform a full completion and return the generated text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Perform a streaming completion, sending tokens to `tx` as they
    /// arrive. Returns the assembled full text on success. Token order on
    /// the channel matches generation order.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry on transient
/// errors.
///
/// Retries on `RateLimited` (respects `retry_after_secs`), `Streaming`,
/// `Connection`, and `Timeout`. Permanent errors (auth, parse) return
/// immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, GenerationError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| GenerationError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &GenerationError) -> bool {
    matches!(
        err,
        GenerationError::RateLimited { .. }
            | GenerationError::Streaming { .. }
            | GenerationError::Connection { .. }
            | GenerationError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after headers.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &GenerationError) -> u64 {
    if let GenerationError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Simple pseudo-random for jitter (avoids pulling in the rand crate).
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Instantiate the configured generation backend.
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, GenerationError> {
    match config.provider.as_str() {
        "openai" | "ollama" | "vllm" | "lmstudio" | "openai-compatible" => {
            Ok(Arc::new(OpenAiCompatibleGenerator::new(config)?))
        }
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => Err(GenerationError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

/// A generator wrapper that bounds concurrent backend calls with a
/// semaphore. Excess calls from a wide author panel queue rather than fail.
pub struct PooledGenerator {
    inner: Arc<dyn Generator>,
    permits: Arc<Semaphore>,
}

impl PooledGenerator {
    pub fn new(inner: Arc<dyn Generator>, max_concurrency: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

#[async_trait]
impl Generator for PooledGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GenerationError::Connection {
                message: "generator pool closed".to_string(),
            })?;
        self.inner.generate(request).await
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GenerationError::Connection {
                message: "generator pool closed".to_string(),
            })?;
        self.inner.generate_streaming(request, tx).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// A mock generation backend for testing and development.
pub struct MockGenerator {
    model: String,
    response: String,
    /// Fixed artificial latency per call.
    delay: Option<Duration>,
    /// Fail any request whose prompts contain this substring.
    fail_if_contains: Option<String>,
    /// Fail every request.
    always_fail: bool,
    calls: AtomicUsize,
}

impl MockGenerator {
    /// A generator that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            model: "mock-model".to_string(),
            response: text.to_string(),
            delay: None,
            fail_if_contains: None,
            always_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a fixed per-call delay (for concurrency timing tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail any request whose system or user prompt contains `needle`.
    pub fn failing_when(mut self, needle: &str) -> Self {
        self.fail_if_contains = Some(needle.to_string());
        self
    }

    /// A generator that fails every request.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::with_response("")
        }
    }

    /// Number of generate calls made so far (streaming included).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(GenerationError::ApiRequest {
                message: "mock backend configured to fail".to_string(),
            });
        }
        if let Some(needle) = &self.fail_if_contains
            && (request.system_prompt.contains(needle) || request.user_prompt.contains(needle))
        {
            return Err(GenerationError::ApiRequest {
                message: format!("mock backend failing on '{needle}'"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.check(request)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        self.check(request)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for word in self.response.split_whitespace() {
            let _ = tx.send(format!("{word} ")).await;
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&GenerationError::Timeout { timeout_secs: 5 }));
        assert!(is_retryable(&GenerationError::RateLimited {
            retry_after_secs: 1
        }));
        assert!(!is_retryable(&GenerationError::AuthFailed {
            provider: "openai".into()
        }));
        assert!(!is_retryable(&GenerationError::ResponseParse {
            message: "bad json".into()
        }));
    }

    #[test]
    fn test_exponential_backoff_growth() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 100);
        assert_eq!(compute_exponential_backoff(&config, 1), 200);
        assert_eq!(compute_exponential_backoff(&config, 2), 400);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 4_000,
            backoff_multiplier: 10.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 5), 4_000);
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = no_jitter();
        let delay = compute_backoff(
            &config,
            0,
            &GenerationError::RateLimited { retry_after_secs: 3 },
        );
        assert_eq!(delay, 3_000);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let result = with_retry(&no_jitter(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GenerationError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let attempts = AtomicUsize::new(0);
        let result: Result<String, _> = with_retry(&no_jitter(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerationError::AuthFailed {
                    provider: "openai".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(GenerationError::AuthFailed { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<String, _> = with_retry(&no_jitter(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerationError::Timeout { timeout_secs: 1 })
            }
        })
        .await;
        assert!(matches!(result, Err(GenerationError::Timeout { .. })));
        // initial call + 2 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_create_generator_unsupported() {
        let config = GeneratorConfig {
            provider: "palm".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_generator(&config),
            Err(GenerationError::UnsupportedProvider { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_generator_returns_response() {
        let generator = MockGenerator::with_response("the answer");
        let text = generator.generate(&GenerationRequest::default()).await.unwrap();
        assert_eq!(text, "the answer");
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_generator_failing_when() {
        let generator = MockGenerator::with_response("ok").failing_when("Whitman");
        let mut request = GenerationRequest::default();
        request.system_prompt = "You are Walt Whitman.".to_string();
        assert!(generator.generate(&request).await.is_err());

        request.system_prompt = "You are Karl Marx.".to_string();
        assert!(generator.generate(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_generator_streaming_tokens() {
        let generator = MockGenerator::with_response("one two three");
        let (tx, mut rx) = mpsc::channel(16);
        let full = generator
            .generate_streaming(&GenerationRequest::default(), tx)
            .await
            .unwrap();
        assert_eq!(full, "one two three");

        let mut tokens = Vec::new();
        while let Some(t) = rx.recv().await {
            tokens.push(t);
        }
        assert_eq!(tokens, vec!["one ", "two ", "three "]);
    }

    #[tokio::test]
    async fn test_pooled_generator_bounds_concurrency() {
        use std::sync::atomic::AtomicUsize;

        struct Probe {
            active: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl Generator for Probe {
            async fn generate(
                &self,
                _request: &GenerationRequest,
            ) -> Result<String, GenerationError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(String::new())
            }

            async fn generate_streaming(
                &self,
                request: &GenerationRequest,
                _tx: mpsc::Sender<String>,
            ) -> Result<String, GenerationError> {
                self.generate(request).await
            }

            fn model_name(&self) -> &str {
                "probe"
            }
        }

        let probe = Arc::new(Probe {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let inner: Arc<dyn Generator> = probe.clone();
        let pooled = Arc::new(PooledGenerator::new(inner, 2));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = Arc::clone(&pooled);
            handles.push(tokio::spawn(async move {
                g.generate(&GenerationRequest::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }
}
