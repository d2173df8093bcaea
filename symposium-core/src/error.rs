//! Error types for the Symposium engine core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering author selection, embedding, retrieval, generation, caching,
//! and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the Symposium core library.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from author selection.
///
/// Selection errors are fatal to the whole request and are surfaced
/// before any retrieval or generation work starts.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("no authors registered")]
    NoAuthors,

    #[error("author not found: {id}")]
    AuthorNotFound { id: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Errors from embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {message}")]
    Request { message: String },

    #[error("embedding response parse error: {message}")]
    ResponseParse { message: String },
}

/// Errors from the vector store.
///
/// Fatal to a single author's response only; the orchestrator degrades
/// the affected response instead of aborting the round.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("vector store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("vector store query failed: {message}")]
    QueryFailed { message: String },
}

/// Errors from generation backends.
///
/// Fatal to a single author's response only.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Generation provider not supported: {name}")]
    UnsupportedProvider { name: String },
}

/// Errors internal to the response cache.
///
/// Always recovered locally: a cache failure degrades to a miss and is
/// logged, never surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;
