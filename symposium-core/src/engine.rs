//! Engine facade: the call shapes the outer surface consumes.
//!
//! Owns the wired components (router, responder, orchestrator, cache) and
//! exposes `select_authors`, `answer` (single round, cache-eligible) and
//! `debate` (multi-round, never cached). Selection errors abort a request
//! before any retrieval or generation work; per-author failures surface
//! only inside the payload.

use crate::authors::AuthorRegistry;
use crate::cache::{CacheStats, ResponseCache};
use crate::config::EngineConfig;
use crate::debate::DebateOrchestrator;
use crate::embeddings::Embedder;
use crate::error::{EngineError, SelectionError};
use crate::providers::{Generator, PooledGenerator};
use crate::responder::Responder;
use crate::router::{Selection, SemanticRouter};
use crate::store::{PooledStore, VectorStore};
use crate::types::{
    Answer, DebateEvent, DebateSession, Query, RoundType, SessionStats,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// The query-routing, retrieval-augmented, debate-capable engine.
pub struct DebateEngine {
    router: SemanticRouter,
    orchestrator: DebateOrchestrator,
    cache: Arc<ResponseCache>,
    config: EngineConfig,
}

impl DebateEngine {
    /// Wire the engine from its collaborators.
    ///
    /// The vector store and generation backend are wrapped in bounded
    /// concurrency pools sized from `config.pools`, independently of the
    /// per-round author fan-out.
    pub fn new(
        registry: Arc<AuthorRegistry>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        config: EngineConfig,
    ) -> Self {
        let store: Arc<dyn VectorStore> =
            Arc::new(PooledStore::new(store, config.pools.vector_store));
        let generator: Arc<dyn Generator> =
            Arc::new(PooledGenerator::new(generator, config.pools.generator));
        let responder = Arc::new(Responder::new(store, generator, config.responder.clone()));

        Self {
            router: SemanticRouter::new(registry, embedder),
            orchestrator: DebateOrchestrator::new(responder),
            cache: Arc::new(ResponseCache::new(config.cache.clone())),
            config,
        }
    }

    /// Route a query to its participating authors.
    pub async fn select_authors(&self, query: &Query) -> Result<Selection, SelectionError> {
        self.router.select(query).await
    }

    /// Answer a single-round query, consulting the response cache first.
    pub async fn answer(&self, query: &Query) -> Result<Answer, EngineError> {
        let selection = self.router.select(query).await?;

        if let Some(hit) = self.cache.get(&query.text, &selection.query_vector) {
            info!(authors = hit.responses.len(), "Serving answer from cache");
            return Ok(hit);
        }

        let session = self.orchestrator.run(query, &selection, 1).await;
        let answer = single_round_answer(&session);
        self.maybe_cache(query, &selection, &answer);
        Ok(answer)
    }

    /// Streaming variant of `answer`. A cache hit replays the stored payload
    /// as `response_complete` events (no token events, no backend calls).
    pub async fn answer_streaming(
        &self,
        query: &Query,
        events: mpsc::Sender<DebateEvent>,
    ) -> Result<Answer, EngineError> {
        let selection = match self.router.select(query).await {
            Ok(selection) => selection,
            Err(e) => {
                let _ = events
                    .send(DebateEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        if let Some(hit) = self.cache.get(&query.text, &selection.query_vector) {
            info!(authors = hit.responses.len(), "Replaying cached answer on stream");
            replay_answer(&hit, &events).await;
            return Ok(hit);
        }

        let session = self
            .orchestrator
            .run_streaming(query, &selection, 1, events)
            .await;
        let answer = single_round_answer(&session);
        self.maybe_cache(query, &selection, &answer);
        Ok(answer)
    }

    /// Run a multi-round debate. Debate sessions are never cached: rebuttal
    /// context makes them non-idempotent across calls.
    pub async fn debate(
        &self,
        query: &Query,
        num_rounds: usize,
    ) -> Result<DebateSession, EngineError> {
        validate_rounds(num_rounds)?;
        let selection = self.router.select(query).await?;
        Ok(self.orchestrator.run(query, &selection, num_rounds).await)
    }

    /// Streaming variant of `debate`.
    pub async fn debate_streaming(
        &self,
        query: &Query,
        num_rounds: usize,
        events: mpsc::Sender<DebateEvent>,
    ) -> Result<DebateSession, EngineError> {
        validate_rounds(num_rounds)?;
        let selection = match self.router.select(query).await {
            Ok(selection) => selection,
            Err(e) => {
                let _ = events
                    .send(DebateEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };
        Ok(self
            .orchestrator
            .run_streaming(query, &selection, num_rounds, events)
            .await)
    }

    /// Rounds to run when the caller does not specify.
    pub fn default_rounds(&self) -> usize {
        self.config.debate.default_rounds
    }

    /// Configured capacity for per-session event channels.
    pub fn event_channel_capacity(&self) -> usize {
        self.config.debate.channel_capacity
    }

    /// Response-cache statistics snapshot.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Insert a generated answer unless every author failed: a transient
    /// backend outage must not pin a useless payload for a full TTL.
    fn maybe_cache(&self, query: &Query, selection: &Selection, answer: &Answer) {
        if answer.succeeded() > 0 {
            self.cache
                .insert(&query.text, &selection.query_vector, answer);
        }
    }
}

fn validate_rounds(num_rounds: usize) -> Result<(), EngineError> {
    if num_rounds < 1 {
        return Err(SelectionError::InvalidQuery {
            reason: "num_rounds must be at least 1".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Project a 1-round session onto the answer payload.
fn single_round_answer(session: &DebateSession) -> Answer {
    Answer {
        responses: session
            .rounds
            .first()
            .map(|r| r.responses.clone())
            .unwrap_or_default(),
        selection_method: session.selection_method,
        total_latency_ms: session.total_latency_ms,
        cache_hit: false,
    }
}

/// Replay a cached payload as the standard event sequence.
async fn replay_answer(answer: &Answer, events: &mpsc::Sender<DebateEvent>) {
    let start = Instant::now();
    let author_ids: Vec<String> = answer
        .responses
        .iter()
        .map(|r| r.author_id.clone())
        .collect();

    let frames = [
        DebateEvent::AuthorsSelected {
            author_ids,
            selection_method: answer.selection_method,
        },
        DebateEvent::RoundStart {
            round_number: 1,
            round_type: RoundType::Initial,
        },
    ];
    for frame in frames {
        if events.send(frame).await.is_err() {
            return;
        }
    }
    for response in &answer.responses {
        let frame = DebateEvent::ResponseComplete {
            round_number: 1,
            response: response.clone(),
        };
        if events.send(frame).await.is_err() {
            return;
        }
    }

    let surviving = answer.succeeded();
    let stats = SessionStats {
        total_authors: answer.responses.len(),
        surviving_authors: surviving,
        failed_authors: answer.responses.len() - surviving,
        rounds_completed: 1,
        total_latency_ms: start.elapsed().as_millis() as u64,
    };
    let _ = events.send(DebateEvent::RoundEnd { round_number: 1 }).await;
    let _ = events.send(DebateEvent::Done { stats }).await;
}
