//! Retrieval-augmented responder.
//!
//! Produces a single author's answer: retrieve the top-K chunks from that
//! author's corpus, assemble the voice prompt and context block (plus peer
//! excerpts on rebuttal rounds), and invoke the generation backend.
//!
//! Failure isolation: a retrieval or generation error never escapes this
//! module. It degrades to a `failed = true` response so the orchestrator can
//! carry on with the surviving authors.

use crate::authors::Author;
use crate::error::GenerationError;
use crate::providers::{GenerationRequest, Generator};
use crate::store::VectorStore;
use crate::types::{AuthorResponse, DebateEvent, RetrievedChunk};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Chunks retrieved per author per response.
    pub top_k: usize,
    /// Per-call timeout covering retrieval and generation, in seconds.
    /// A timed-out call is treated identically to a backend failure.
    pub timeout_secs: u64,
    /// Maximum tokens per generated response.
    pub max_response_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            timeout_secs: 60,
            max_response_tokens: 300,
            temperature: 0.7,
        }
    }
}

/// A peer's most recent response, supplied as rebuttal context.
#[derive(Debug, Clone)]
pub struct PeerExcerpt {
    pub author_id: String,
    pub author_name: String,
    pub text: String,
}

/// One responder invocation.
pub struct ResponderRequest<'a> {
    pub author: &'a Author,
    pub query_text: &'a str,
    /// Query vector reused from the router, never re-embedded.
    pub query_vector: &'a [f32],
    /// Other authors' most recent responses; empty on the initial round.
    pub peers: &'a [PeerExcerpt],
    /// 1-based round number, used to tag streamed events.
    pub round_number: usize,
}

/// Generates one author's retrieval-grounded response.
pub struct Responder {
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    config: ResponderConfig,
}

impl Responder {
    pub fn new(
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    /// Produce one author's response, degrading on any failure.
    pub async fn respond(&self, request: &ResponderRequest<'_>) -> AuthorResponse {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let outcome = tokio::time::timeout(timeout, self.respond_inner(request, None)).await;
        self.finish(request, start, outcome)
    }

    /// Streaming variant: forwards each generated token on the session
    /// channel, tagged with the author id and round number.
    pub async fn respond_streaming(
        &self,
        request: &ResponderRequest<'_>,
        events: &mpsc::Sender<DebateEvent>,
    ) -> AuthorResponse {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let outcome = tokio::time::timeout(timeout, self.respond_inner(request, Some(events)))
            .await;
        self.finish(request, start, outcome)
    }

    /// Fold the timed outcome into an `AuthorResponse`, logging failures
    /// out-of-band.
    fn finish(
        &self,
        request: &ResponderRequest<'_>,
        start: Instant,
        outcome: Result<Result<(String, Vec<RetrievedChunk>), GenerationError>, tokio::time::error::Elapsed>,
    ) -> AuthorResponse {
        let latency_ms = start.elapsed().as_millis() as u64;
        let author_id = &request.author.id;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                timeout_secs: self.config.timeout_secs,
            }),
        };

        match result {
            Ok((text, chunks)) => {
                let relevance_score = if chunks.is_empty() {
                    0.0
                } else {
                    chunks.iter().map(|c| c.similarity).sum::<f32>() / chunks.len() as f32
                };
                debug!(
                    author = author_id.as_str(),
                    relevance = relevance_score,
                    latency_ms,
                    "Generated author response"
                );
                AuthorResponse {
                    author_id: author_id.clone(),
                    text,
                    relevance_score,
                    retrieved_chunks: chunks,
                    latency_ms,
                    failed: false,
                }
            }
            Err(e) => {
                warn!(
                    author = author_id.as_str(),
                    error = %e,
                    latency_ms,
                    "Author response failed"
                );
                AuthorResponse::failed(author_id.clone(), latency_ms)
            }
        }
    }

    /// Retrieval + generation. Retrieval errors are folded into
    /// `GenerationError` space here solely for uniform degradation; the
    /// distinction is preserved in the logs.
    async fn respond_inner(
        &self,
        request: &ResponderRequest<'_>,
        events: Option<&mpsc::Sender<DebateEvent>>,
    ) -> Result<(String, Vec<RetrievedChunk>), GenerationError> {
        let chunks = self
            .store
            .search(&request.author.id, request.query_vector, self.config.top_k)
            .await
            .map_err(|e| {
                warn!(author = request.author.id.as_str(), error = %e, "Retrieval failed");
                GenerationError::ApiRequest {
                    message: format!("retrieval failed: {e}"),
                }
            })?;

        debug!(
            author = request.author.id.as_str(),
            chunks = chunks.len(),
            "Retrieved context chunks"
        );

        let gen_request = GenerationRequest {
            system_prompt: request.author.voice_prompt().to_string(),
            user_prompt: build_user_prompt(request.query_text, &chunks, request.peers),
            max_tokens: self.config.max_response_tokens,
            temperature: self.config.temperature,
        };

        let text = match events {
            None => self.generator.generate(&gen_request).await?,
            Some(events) => {
                let (token_tx, mut token_rx) = mpsc::channel::<String>(32);
                let forward = {
                    let events = events.clone();
                    let author_id = request.author.id.clone();
                    let round_number = request.round_number;
                    async move {
                        while let Some(token) = token_rx.recv().await {
                            let event = DebateEvent::Token {
                                round_number,
                                author_id: author_id.clone(),
                                token,
                            };
                            if events.send(event).await.is_err() {
                                // Consumer is gone; drain the channel so the
                                // generator is not blocked on a full buffer.
                                while token_rx.recv().await.is_some() {}
                                break;
                            }
                        }
                    }
                };
                let (text, ()) =
                    tokio::join!(self.generator.generate_streaming(&gen_request, token_tx), forward);
                text?
            }
        };

        Ok((text, chunks))
    }
}

/// Build a numbered context block from retrieved chunks, preserving
/// source locators for citation.
fn build_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return "No relevant context found.".to_string();
    }

    let mut parts = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let source_info = if chunk.source.is_empty() {
            String::new()
        } else {
            format!(" (from {})", chunk.source)
        };
        parts.push(format!("[{}]{}: {}", i + 1, source_info, chunk.text));
    }
    parts.join("\n\n")
}

/// Build the user prompt: context excerpts, the query, and on rebuttal
/// rounds a labeled excerpt of each other author's most recent response.
fn build_user_prompt(query_text: &str, chunks: &[RetrievedChunk], peers: &[PeerExcerpt]) -> String {
    let mut prompt = format!(
        "Based on the following excerpts from your works, please respond to the user's query.\n\n\
         RELEVANT EXCERPTS:\n{}\n\nUSER QUERY:\n{}\n",
        build_context(chunks),
        query_text,
    );

    if !peers.is_empty() {
        prompt.push_str("\nOther thinkers have provided the following perspectives:\n\n");
        for (i, peer) in peers.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {} said:\n\"{}\"\n\n",
                i + 1,
                peer.author_name,
                peer.text
            ));
        }
        prompt.push_str(
            "Now, please respond to these perspectives. You may critique or build upon \
             their arguments, highlight where you agree or disagree, and offer your own \
             distinct perspective. Be direct and substantive in engaging with the other \
             viewpoints.\n",
        );
    }

    prompt.push_str(
        "\nPlease provide a response in your characteristic voice and style. Limit your \
         response to a maximum of 3 paragraphs. Focus on directly addressing the query \
         while drawing from the provided context.",
    );

    prompt
}
