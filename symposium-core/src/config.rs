//! Configuration system for the Symposium engine.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment. Configuration is loaded from `symposium.toml` in the
//! working directory (or an explicit path) and `SYMPOSIUM_`-prefixed
//! environment variables with `__` as the section separator.
//!
//! Component-specific config structs live beside their components
//! (`RouterConfig` in `router.rs`, `CacheConfig` in `cache.rs`, ...);
//! this module holds the aggregate and the backend/retry settings.

use crate::cache::CacheConfig;
use crate::debate::DebateConfig;
use crate::embeddings::EmbeddingConfig;
use crate::error::ConfigError;
use crate::responder::ResponderConfig;
use crate::router::RouterConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub generator: GeneratorConfig,
    pub embedding: EmbeddingConfig,
    pub router: RouterConfig,
    pub responder: ResponderConfig,
    pub debate: DebateConfig,
    pub cache: CacheConfig,
    pub pools: PoolConfig,
}

/// Configuration for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Provider name: "openai", "anthropic", "gemini", "ollama".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "claude-sonnet-4-20250514").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retry policy for transient backend errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            request_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy with exponential backoff for transient errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Bounded-concurrency pool sizes for downstream collaborators.
///
/// Sized independently of the per-round author fan-out: excess concurrent
/// calls queue on a semaphore rather than fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent generation-backend calls.
    pub generator: usize,
    /// Maximum concurrent vector-store searches.
    pub vector_store: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            generator: 8,
            vector_store: 16,
        }
    }
}

/// Load the engine configuration.
///
/// Layering: serialized defaults, then the TOML file (explicit path, or
/// `symposium.toml` in the working directory when present), then
/// `SYMPOSIUM_`-prefixed environment variables (`__` separates sections,
/// e.g. `SYMPOSIUM_CACHE__TTL_SECS=600`).
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::FileNotFound {
                    path: p.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(p));
        }
        None => {
            let default_path = Path::new("symposium.toml");
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }
    }

    figment = figment.merge(Env::prefixed("SYMPOSIUM_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.generator.provider, "openai");
        assert_eq!(config.responder.max_response_tokens, 300);
        assert_eq!(config.pools.generator, 8);
        assert_eq!(config.pools.vector_store, 16);
        assert_eq!(config.router.min_authors, 2);
        assert_eq!(config.cache.ttl_secs, 3600);
    }

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_backoff_ms, 500);
        assert!(retry.jitter);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let result = load_config(Some(Path::new("/nonexistent/symposium.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
            [generator]
            provider = "ollama"
            model = "llama3.1:8b"
            base_url = "http://127.0.0.1:11434/v1"

            [cache]
            ttl_secs = 120
            similarity_threshold = 0.9

            [router]
            max_authors = 3
            "#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.generator.provider, "ollama");
        assert_eq!(config.generator.model, "llama3.1:8b");
        assert_eq!(config.cache.ttl_secs, 120);
        assert_eq!(config.router.max_authors, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.responder.top_k, 5);
    }

    #[test]
    fn test_generator_config_serde_roundtrip() {
        let config = GeneratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GeneratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider, config.provider);
        assert_eq!(back.request_timeout_secs, config.request_timeout_secs);
    }
}
