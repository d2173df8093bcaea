//! Core type definitions for the Symposium engine.
//!
//! Defines the fundamental data structures used throughout the system:
//! queries, retrieved chunks, author responses, debate rounds and sessions,
//! and the per-session event stream.

use crate::error::SelectionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the router chose the participating author set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// The caller named the authors explicitly.
    Specified,
    /// Enough authors cleared the relevance threshold.
    Threshold,
    /// Too few cleared the threshold; padded with the best of the rest.
    FallbackTopK,
}

impl std::fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMethod::Specified => write!(f, "specified"),
            SelectionMethod::Threshold => write!(f, "threshold"),
            SelectionMethod::FallbackTopK => write!(f, "fallback_top_k"),
        }
    }
}

/// The kind of a debate round. Round 1 is always `Initial`; every
/// subsequent round is `Rebuttal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Initial,
    Rebuttal,
}

impl RoundType {
    /// Round type for a 1-based round number.
    pub fn for_round(round_number: usize) -> Self {
        if round_number <= 1 {
            RoundType::Initial
        } else {
            RoundType::Rebuttal
        }
    }
}

impl std::fmt::Display for RoundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundType::Initial => write!(f, "initial"),
            RoundType::Rebuttal => write!(f, "rebuttal"),
        }
    }
}

fn default_min_authors() -> usize {
    2
}
fn default_max_authors() -> usize {
    5
}
fn default_relevance_threshold() -> f32 {
    0.7
}

/// A user query to the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The user's question or prompt.
    pub text: String,
    /// Specific author ids to query; empty for automatic selection.
    #[serde(default)]
    pub specified_author_ids: Vec<String>,
    /// Minimum number of authors to select.
    #[serde(default = "default_min_authors")]
    pub min_authors: usize,
    /// Maximum number of authors to select.
    #[serde(default = "default_max_authors")]
    pub max_authors: usize,
    /// Minimum profile similarity for threshold-based selection.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
}

impl Query {
    /// Create a query with default selection bounds.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            specified_author_ids: Vec::new(),
            min_authors: default_min_authors(),
            max_authors: default_max_authors(),
            relevance_threshold: default_relevance_threshold(),
        }
    }

    /// Create a query addressed to an explicit author list.
    pub fn for_authors(text: impl Into<String>, author_ids: Vec<String>) -> Self {
        Self {
            specified_author_ids: author_ids,
            ..Self::new(text)
        }
    }

    /// Check the query invariants: non-empty text and
    /// `1 <= min_authors <= max_authors`.
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.text.trim().is_empty() {
            return Err(SelectionError::InvalidQuery {
                reason: "query text must not be empty".to_string(),
            });
        }
        if self.min_authors < 1 {
            return Err(SelectionError::InvalidQuery {
                reason: "min_authors must be at least 1".to_string(),
            });
        }
        if self.min_authors > self.max_authors {
            return Err(SelectionError::InvalidQuery {
                reason: format!(
                    "min_authors ({}) must not exceed max_authors ({})",
                    self.min_authors, self.max_authors
                ),
            });
        }
        Ok(())
    }
}

/// A text chunk retrieved from an author's corpus for one response.
///
/// Ephemeral: owned by the response that requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// The chunk text.
    pub text: String,
    /// Source locator for citation (book, section, url).
    pub source: String,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
}

/// One author's answer within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorResponse {
    pub author_id: String,
    /// The generated text; empty when `failed`.
    pub text: String,
    /// Mean similarity of the retrieved chunks (0.0 when none).
    pub relevance_score: f32,
    /// Chunks that grounded this response.
    pub retrieved_chunks: Vec<RetrievedChunk>,
    /// Wall-clock latency of retrieval plus generation, in milliseconds.
    pub latency_ms: u64,
    /// Whether retrieval or generation failed for this author.
    pub failed: bool,
}

impl AuthorResponse {
    /// A degraded response recording a per-author failure. The error itself
    /// is logged out-of-band and never fed into partner context.
    pub fn failed(author_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            author_id: author_id.into(),
            text: String::new(),
            relevance_score: 0.0,
            retrieved_chunks: Vec::new(),
            latency_ms,
            failed: true,
        }
    }
}

/// One synchronized wave of concurrent per-author generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-based round number.
    pub round_number: usize,
    pub round_type: RoundType,
    pub responses: Vec<AuthorResponse>,
}

/// A complete multi-round debate. Lives for the duration of one request
/// and is discarded after delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub query: Query,
    /// Author ids in selection order.
    pub authors_selected: Vec<String>,
    pub selection_method: SelectionMethod,
    pub rounds: Vec<DebateRound>,
    pub total_latency_ms: u64,
}

/// The single-round answer payload: what `answer()` returns and what the
/// response cache stores. Multi-round debates are never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub responses: Vec<AuthorResponse>,
    pub selection_method: SelectionMethod,
    pub total_latency_ms: u64,
    /// Whether this payload was served from the response cache.
    pub cache_hit: bool,
}

impl Answer {
    /// Number of authors that produced a usable response.
    pub fn succeeded(&self) -> usize {
        self.responses.iter().filter(|r| !r.failed).count()
    }
}

/// Aggregate statistics carried by the terminal `done` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Authors selected at the start of the session.
    pub total_authors: usize,
    /// Authors still active when the session finished.
    pub surviving_authors: usize,
    /// Authors dropped after a retrieval or generation failure.
    pub failed_authors: usize,
    /// Rounds actually dispatched (may be fewer than requested when every
    /// author failed early).
    pub rounds_completed: usize,
    pub total_latency_ms: u64,
}

/// An event on a session's ordered stream.
///
/// Token events for concurrently generating authors interleave; consumers
/// demultiplex by `author_id` and `round_number` rather than arrival order.
/// Token order is preserved per author only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    AuthorsSelected {
        author_ids: Vec<String>,
        selection_method: SelectionMethod,
    },
    RoundStart {
        round_number: usize,
        round_type: RoundType,
    },
    AuthorStart {
        round_number: usize,
        author_id: String,
    },
    Token {
        round_number: usize,
        author_id: String,
        token: String,
    },
    ResponseComplete {
        round_number: usize,
        response: AuthorResponse,
    },
    RoundEnd {
        round_number: usize,
    },
    Done {
        stats: SessionStats,
    },
    Error {
        message: String,
    },
}
