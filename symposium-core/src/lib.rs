//! # Symposium Core
//!
//! Core engine for the Symposium debate panel: semantic author routing,
//! retrieval-augmented response generation, multi-round debate
//! orchestration with streaming, and response caching.
//!
//! The engine consumes three abstract collaborators (an embedding provider,
//! a vector store, and a generation backend) and exposes the `DebateEngine`
//! facade to the outer surface.

pub mod authors;
pub mod cache;
pub mod config;
pub mod debate;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod providers;
pub mod responder;
pub mod router;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use authors::{Author, AuthorRegistry, load_registry};
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::{EngineConfig, GeneratorConfig, load_config};
pub use debate::{DebateConfig, DebateOrchestrator, SessionState};
pub use embeddings::{Embedder, EmbeddingConfig, cosine_similarity, create_embedder};
pub use engine::DebateEngine;
pub use error::{EngineError, Result, SelectionError};
pub use providers::{GenerationRequest, Generator, MockGenerator, create_generator};
pub use responder::{Responder, ResponderConfig};
pub use router::{RouterConfig, Selection, SemanticRouter};
pub use store::{MemoryVectorStore, StoredChunk, VectorStore};
pub use types::{
    Answer, AuthorResponse, DebateEvent, DebateRound, DebateSession, Query, RetrievedChunk,
    RoundType, SelectionMethod, SessionStats,
};
