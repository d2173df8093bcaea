//! Debate orchestrator — multi-round response sequencing.
//!
//! Runs `num_rounds` (>= 1) of responses across the selected authors:
//! rounds are strictly sequential, authors within a round run as parallel
//! tasks with a fan-out/fan-in barrier. From round 2 onward each author
//! receives every other surviving author's most recent response as rebuttal
//! context. Authors that fail in any round are dropped from all subsequent
//! rounds; a debate with partial or zero surviving authors is a valid,
//! reportable outcome, never a session-level error.

use crate::authors::Author;
use crate::responder::{PeerExcerpt, Responder, ResponderRequest};
use crate::router::Selection;
use crate::types::{
    AuthorResponse, DebateEvent, DebateRound, DebateSession, Query, RoundType, SessionStats,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for debate sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Rounds to run when the caller does not specify.
    pub default_rounds: usize,
    /// Capacity of the per-session event channel.
    pub channel_capacity: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            default_rounds: 2,
            channel_capacity: 256,
        }
    }
}

/// Lifecycle of one debate session.
///
/// `Failed` is reached only when author selection itself fails, which
/// happens before the orchestrator is invoked; per-author failures inside a
/// round never transition the session here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Selecting,
    RoundRunning(usize),
    Done,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Selecting => write!(f, "selecting"),
            SessionState::RoundRunning(r) => write!(f, "round_running({r})"),
            SessionState::Done => write!(f, "done"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Sequences rounds and fans per-author work out within each round.
pub struct DebateOrchestrator {
    responder: Arc<Responder>,
}

impl DebateOrchestrator {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self { responder }
    }

    /// Run a debate to completion and return the full session.
    pub async fn run(&self, query: &Query, selection: &Selection, num_rounds: usize) -> DebateSession {
        self.run_inner(query, selection, num_rounds, None).await
    }

    /// Run a debate, emitting the ordered event stream on `events`.
    ///
    /// If the consumer drops the receiver mid-stream, in-flight responder
    /// calls for the current round are cancelled and no further rounds are
    /// dispatched.
    pub async fn run_streaming(
        &self,
        query: &Query,
        selection: &Selection,
        num_rounds: usize,
        events: mpsc::Sender<DebateEvent>,
    ) -> DebateSession {
        self.run_inner(query, selection, num_rounds, Some(events)).await
    }

    async fn run_inner(
        &self,
        query: &Query,
        selection: &Selection,
        num_rounds: usize,
        events: Option<mpsc::Sender<DebateEvent>>,
    ) -> DebateSession {
        let start = Instant::now();
        let started_at = chrono::Utc::now();
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let mut state = SessionState::Selecting;
        info!(
            session = %session_id,
            state = %state,
            authors = selection.authors.len(),
            rounds = num_rounds,
            method = %selection.method,
            "Debate session starting"
        );

        Self::emit(
            &events,
            &cancel,
            DebateEvent::AuthorsSelected {
                author_ids: selection.author_ids(),
                selection_method: selection.method,
            },
        )
        .await;

        let names: HashMap<String, String> = selection
            .authors
            .iter()
            .map(|a| (a.id.clone(), a.name.clone()))
            .collect();

        let mut active: Vec<Arc<Author>> = selection.authors.clone();
        let mut rounds: Vec<DebateRound> = Vec::new();

        for round_number in 1..=num_rounds {
            if active.is_empty() {
                info!(
                    session = %session_id,
                    round = round_number,
                    "No surviving authors, ending debate early"
                );
                break;
            }
            if cancel.is_cancelled() {
                warn!(session = %session_id, "Client disconnected, aborting session");
                break;
            }

            state = SessionState::RoundRunning(round_number);
            let round_type = RoundType::for_round(round_number);
            debug!(
                session = %session_id,
                state = %state,
                round_type = %round_type,
                authors = active.len(),
                "Round starting"
            );

            Self::emit(
                &events,
                &cancel,
                DebateEvent::RoundStart {
                    round_number,
                    round_type,
                },
            )
            .await;

            let responses = self
                .run_round(
                    query,
                    selection,
                    &active,
                    rounds.last(),
                    round_number,
                    &names,
                    &events,
                    &cancel,
                )
                .await;

            let failed_ids: HashSet<String> = responses
                .iter()
                .filter(|r| r.failed)
                .map(|r| r.author_id.clone())
                .collect();
            if !failed_ids.is_empty() {
                warn!(
                    session = %session_id,
                    round = round_number,
                    failed = ?failed_ids,
                    "Dropping failed authors from subsequent rounds"
                );
            }
            active.retain(|a| !failed_ids.contains(&a.id));

            Self::emit(&events, &cancel, DebateEvent::RoundEnd { round_number }).await;

            rounds.push(DebateRound {
                round_number,
                round_type,
                responses,
            });
        }

        let total_latency_ms = start.elapsed().as_millis() as u64;
        let stats = SessionStats {
            total_authors: selection.authors.len(),
            surviving_authors: active.len(),
            failed_authors: selection.authors.len() - active.len(),
            rounds_completed: rounds.len(),
            total_latency_ms,
        };
        Self::emit(&events, &cancel, DebateEvent::Done { stats }).await;

        state = SessionState::Done;
        info!(
            session = %session_id,
            state = %state,
            rounds = rounds.len(),
            surviving = active.len(),
            total_latency_ms,
            "Debate session complete"
        );

        DebateSession {
            id: session_id,
            started_at,
            query: query.clone(),
            authors_selected: selection.author_ids(),
            selection_method: selection.method,
            rounds,
            total_latency_ms,
        }
    }

    /// Dispatch one round: every active author as a parallel task, in
    /// selection order, then the fan-in barrier. Completion order within
    /// the round is unconstrained; responses are collected back into
    /// dispatch order.
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        query: &Query,
        selection: &Selection,
        active: &[Arc<Author>],
        previous: Option<&DebateRound>,
        round_number: usize,
        names: &HashMap<String, String>,
        events: &Option<mpsc::Sender<DebateEvent>>,
        cancel: &CancellationToken,
    ) -> Vec<AuthorResponse> {
        let mut handles = Vec::with_capacity(active.len());

        for author in active {
            let peers: Vec<PeerExcerpt> = previous
                .map(|round| {
                    round
                        .responses
                        .iter()
                        .filter(|r| !r.failed && r.author_id != author.id)
                        .map(|r| PeerExcerpt {
                            author_id: r.author_id.clone(),
                            author_name: names
                                .get(&r.author_id)
                                .cloned()
                                .unwrap_or_else(|| r.author_id.clone()),
                            text: r.text.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let responder = Arc::clone(&self.responder);
            let author = Arc::clone(author);
            let query_text = query.text.clone();
            let query_vector = selection.query_vector.clone();
            let events = events.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let request = ResponderRequest {
                    author: &author,
                    query_text: &query_text,
                    query_vector: &query_vector,
                    peers: &peers,
                    round_number,
                };

                match &events {
                    None => responder.respond(&request).await,
                    Some(tx) => {
                        if tx
                            .send(DebateEvent::AuthorStart {
                                round_number,
                                author_id: author.id.clone(),
                            })
                            .await
                            .is_err()
                        {
                            cancel.cancel();
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => AuthorResponse::failed(author.id.clone(), 0),
                            response = responder.respond_streaming(&request, tx) => {
                                if tx
                                    .send(DebateEvent::ResponseComplete {
                                        round_number,
                                        response: response.clone(),
                                    })
                                    .await
                                    .is_err()
                                {
                                    cancel.cancel();
                                }
                                response
                            }
                        }
                    }
                }
            }));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (author, handle) in active.iter().zip(handles) {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    warn!(author = author.id.as_str(), error = %e, "Responder task panicked");
                    responses.push(AuthorResponse::failed(author.id.clone(), 0));
                }
            }
        }
        responses
    }

    /// Send an event, cancelling the session when the consumer is gone.
    async fn emit(
        events: &Option<mpsc::Sender<DebateEvent>>,
        cancel: &CancellationToken,
        event: DebateEvent,
    ) {
        if let Some(tx) = events
            && tx.send(event).await.is_err()
        {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;
    use crate::error::GenerationError;
    use crate::providers::{GenerationRequest, Generator, MockGenerator};
    use crate::responder::{Responder, ResponderConfig};
    use crate::store::{MemoryVectorStore, StoredChunk};
    use crate::types::SelectionMethod;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    fn author(id: &str, name: &str) -> Arc<Author> {
        Arc::new(Author {
            id: id.into(),
            name: name.into(),
            expertise: vec![],
            voice_template: format!("You are {name}."),
            profile_vector: vec![1.0, 0.0],
            corpus_ref: String::new(),
        })
    }

    fn selection_of(authors: Vec<Arc<Author>>) -> Selection {
        let scores = authors
            .iter()
            .map(|a| (a.id.clone(), cosine_similarity(&[1.0, 0.0], &a.profile_vector)))
            .collect();
        Selection {
            authors,
            scores,
            method: SelectionMethod::Threshold,
            query_vector: vec![1.0, 0.0],
            threshold_used: 0.7,
        }
    }

    fn store_with_corpora(author_ids: &[&str]) -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        for id in author_ids {
            store.insert(
                id,
                StoredChunk {
                    text: format!("writings of {id}"),
                    source: format!("{id} collected works"),
                    embedding: vec![1.0, 0.0],
                },
            );
        }
        store
    }

    fn orchestrator(generator: Arc<dyn Generator>, author_ids: &[&str]) -> DebateOrchestrator {
        let responder = Arc::new(Responder::new(
            store_with_corpora(author_ids),
            generator,
            ResponderConfig::default(),
        ));
        DebateOrchestrator::new(responder)
    }

    /// Records every generation request it serves.
    struct RecordingGenerator {
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl RecordingGenerator {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            // Make each author's text identifiable from its voice prompt.
            Ok(format!("response from [{}]", request.system_prompt))
        }

        async fn generate_streaming(
            &self,
            request: &GenerationRequest,
            _tx: mpsc::Sender<String>,
        ) -> Result<String, GenerationError> {
            self.generate(request).await
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_round_count_and_types() {
        let orchestrator = orchestrator(
            Arc::new(MockGenerator::with_response("a point")),
            &["marx", "whitman"],
        );
        let selection = selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);
        let query = Query::new("What is democracy?");

        let session = orchestrator.run(&query, &selection, 3).await;

        assert_eq!(session.rounds.len(), 3);
        let types: Vec<RoundType> = session.rounds.iter().map(|r| r.round_type).collect();
        assert_eq!(
            types,
            vec![RoundType::Initial, RoundType::Rebuttal, RoundType::Rebuttal]
        );
        for (i, round) in session.rounds.iter().enumerate() {
            assert_eq!(round.round_number, i + 1);
            assert_eq!(round.responses.len(), 2);
        }
        assert_eq!(session.authors_selected, vec!["marx", "whitman"]);
    }

    #[tokio::test]
    async fn test_round_dispatch_follows_selection_order() {
        let orchestrator = orchestrator(
            Arc::new(MockGenerator::with_response("ok")),
            &["marx", "whitman", "baudelaire"],
        );
        let selection = selection_of(vec![
            author("whitman", "Walt Whitman"),
            author("marx", "Karl Marx"),
            author("baudelaire", "Mark Baudelaire"),
        ]);
        let session = orchestrator.run(&Query::new("q"), &selection, 1).await;

        let ids: Vec<&str> = session.rounds[0]
            .responses
            .iter()
            .map(|r| r.author_id.as_str())
            .collect();
        assert_eq!(ids, vec!["whitman", "marx", "baudelaire"]);
    }

    #[tokio::test]
    async fn test_failed_author_dropped_from_later_rounds() {
        // Whitman's backend fails in round 1: round 2 contains only marx,
        // and the session reports one degraded author, not an error.
        let generator = Arc::new(MockGenerator::with_response("a point").failing_when("Whitman"));
        let orchestrator = orchestrator(generator, &["marx", "whitman"]);
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        let session = orchestrator.run(&Query::new("q"), &selection, 2).await;

        assert_eq!(session.rounds.len(), 2);
        let round1 = &session.rounds[0];
        assert_eq!(round1.responses.len(), 2);
        assert!(round1.responses.iter().any(|r| r.author_id == "whitman" && r.failed));

        let round2 = &session.rounds[1];
        assert_eq!(round2.responses.len(), 1);
        assert_eq!(round2.responses[0].author_id, "marx");
        assert!(!round2.responses[0].failed);
    }

    #[tokio::test]
    async fn test_rebuttal_context_contains_peers_only() {
        let generator = Arc::new(RecordingGenerator::new());
        let generator_dyn: Arc<dyn Generator> = generator.clone();
        let responder = Arc::new(Responder::new(
            store_with_corpora(&["marx", "whitman"]),
            generator_dyn,
            ResponderConfig::default(),
        ));
        let orchestrator = DebateOrchestrator::new(responder);
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        orchestrator.run(&Query::new("q"), &selection, 2).await;

        let requests = generator.requests();
        assert_eq!(requests.len(), 4);

        // Round 2 request from marx carries whitman's round-1 text, not his own.
        let marx_round2 = requests
            .iter()
            .filter(|r| r.system_prompt.contains("Karl Marx"))
            .nth(1)
            .unwrap();
        assert!(marx_round2.user_prompt.contains("Walt Whitman said:"));
        assert!(
            marx_round2
                .user_prompt
                .contains("response from [You are Walt Whitman.]")
        );
        assert!(!marx_round2.user_prompt.contains("Karl Marx said:"));

        // Round 1 requests carry no rebuttal context.
        let marx_round1 = requests
            .iter()
            .find(|r| r.system_prompt.contains("Karl Marx"))
            .unwrap();
        assert!(!marx_round1.user_prompt.contains("said:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_wall_clock_is_max_not_sum() {
        // Three authors, each with a 1s mocked backend: the round's
        // wall-clock time approximates max(delays), not sum(delays).
        let generator =
            Arc::new(MockGenerator::with_response("slow answer").with_delay(Duration::from_secs(1)));
        let orchestrator = orchestrator(generator, &["a", "b", "c"]);
        let selection = selection_of(vec![
            author("a", "Author A"),
            author("b", "Author B"),
            author("c", "Author C"),
        ]);

        let started = tokio::time::Instant::now();
        let session = orchestrator.run(&Query::new("q"), &selection, 1).await;
        let elapsed = started.elapsed();

        assert_eq!(session.rounds[0].responses.len(), 3);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(
            elapsed < Duration::from_millis(1500),
            "round took {elapsed:?}, expected ~1s"
        );
    }

    #[tokio::test]
    async fn test_all_failed_ends_early_without_error() {
        let orchestrator = orchestrator(Arc::new(MockGenerator::failing()), &["marx", "whitman"]);
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        let (tx, mut rx) = mpsc::channel(256);
        let session = orchestrator
            .run_streaming(&Query::new("q"), &selection, 3, tx)
            .await;

        // Round 1 ran, every author failed, rounds 2 and 3 never dispatched.
        assert_eq!(session.rounds.len(), 1);

        let mut done_stats = None;
        while let Some(event) = rx.recv().await {
            if let DebateEvent::Done { stats } = event {
                done_stats = Some(stats);
            }
        }
        let stats = done_stats.expect("done event must be emitted");
        assert_eq!(stats.total_authors, 2);
        assert_eq!(stats.surviving_authors, 0);
        assert_eq!(stats.failed_authors, 2);
        assert_eq!(stats.rounds_completed, 1);
    }

    #[tokio::test]
    async fn test_streaming_event_sequence() {
        let orchestrator = orchestrator(
            Arc::new(MockGenerator::with_response("one two")),
            &["marx", "whitman"],
        );
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        let (tx, mut rx) = mpsc::channel(256);
        orchestrator
            .run_streaming(&Query::new("q"), &selection, 2, tx)
            .await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        // Opening and closing frames.
        assert!(matches!(events.first(), Some(DebateEvent::AuthorsSelected { author_ids, .. })
            if author_ids == &vec!["marx".to_string(), "whitman".to_string()]));
        assert!(matches!(events.last(), Some(DebateEvent::Done { .. })));

        // Round frames arrive strictly in order.
        let round_starts: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                DebateEvent::RoundStart { round_number, .. } => Some(*round_number),
                _ => None,
            })
            .collect();
        assert_eq!(round_starts, vec![1, 2]);

        // Every author-scoped event is tagged with a selected author.
        for event in &events {
            if let DebateEvent::Token { author_id, .. } = event {
                assert!(author_id == "marx" || author_id == "whitman");
            }
        }

        // Each round carries one author_start and one response_complete per author.
        let author_starts = events
            .iter()
            .filter(|e| matches!(e, DebateEvent::AuthorStart { .. }))
            .count();
        let completes = events
            .iter()
            .filter(|e| matches!(e, DebateEvent::ResponseComplete { .. }))
            .count();
        assert_eq!(author_starts, 4);
        assert_eq!(completes, 4);

        // round_end(r) precedes round_start(r+1).
        let positions: Vec<(usize, &DebateEvent)> = events.iter().enumerate().collect();
        let end1 = positions
            .iter()
            .find(|(_, e)| matches!(e, DebateEvent::RoundEnd { round_number: 1 }))
            .map(|(i, _)| *i)
            .unwrap();
        let start2 = positions
            .iter()
            .find(|(_, e)| matches!(e, DebateEvent::RoundStart { round_number: 2, .. }))
            .map(|(i, _)| *i)
            .unwrap();
        assert!(end1 < start2);
    }

    #[tokio::test]
    async fn test_tokens_preserve_per_author_order() {
        let orchestrator = orchestrator(
            Arc::new(MockGenerator::with_response("alpha beta gamma")),
            &["marx", "whitman"],
        );
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        let (tx, mut rx) = mpsc::channel(256);
        orchestrator
            .run_streaming(&Query::new("q"), &selection, 1, tx)
            .await;

        let mut per_author: HashMap<String, Vec<String>> = HashMap::new();
        while let Some(event) = rx.recv().await {
            if let DebateEvent::Token {
                author_id, token, ..
            } = event
            {
                per_author.entry(author_id).or_default().push(token);
            }
        }
        for tokens in per_author.values() {
            assert_eq!(tokens, &vec!["alpha ", "beta ", "gamma "]);
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_session() {
        let orchestrator = orchestrator(
            Arc::new(MockGenerator::with_response("a point")),
            &["marx", "whitman"],
        );
        let selection =
            selection_of(vec![author("marx", "Karl Marx"), author("whitman", "Walt Whitman")]);

        let (tx, rx) = mpsc::channel(256);
        drop(rx);

        let session = orchestrator
            .run_streaming(&Query::new("q"), &selection, 5, tx)
            .await;

        // The very first send fails, so no round is dispatched.
        assert!(session.rounds.is_empty());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Selecting.to_string(), "selecting");
        assert_eq!(SessionState::RoundRunning(2).to_string(), "round_running(2)");
        assert_eq!(SessionState::Done.to_string(), "done");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_debate_config_defaults() {
        let config = DebateConfig::default();
        assert_eq!(config.default_rounds, 2);
        assert_eq!(config.channel_capacity, 256);
    }
}
