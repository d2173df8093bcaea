//! Terminal rendering for answers, sessions, and live event streams.

use anyhow::Result;
use symposium_core::{
    Answer, AuthorRegistry, AuthorResponse, DebateEngine, DebateEvent, DebateSession, Query,
};
use tokio::sync::mpsc;

fn display_name(registry: &AuthorRegistry, author_id: &str) -> String {
    registry
        .get(author_id)
        .map(|a| a.name.clone())
        .unwrap_or_else(|| author_id.to_string())
}

fn print_response(response: &AuthorResponse, registry: &AuthorRegistry) {
    let name = display_name(registry, &response.author_id);
    if response.failed {
        println!("--- {name} (no response: backend failed) ---\n");
        return;
    }
    println!(
        "--- {name} (relevance {:.2}, {}ms) ---",
        response.relevance_score, response.latency_ms
    );
    println!("{}\n", response.text);
    if !response.retrieved_chunks.is_empty() {
        println!("  sources:");
        for chunk in &response.retrieved_chunks {
            if !chunk.source.is_empty() {
                println!("  - {} ({:.2})", chunk.source, chunk.similarity);
            }
        }
        println!();
    }
}

/// Render a single-round answer.
pub fn print_answer(answer: &Answer, registry: &AuthorRegistry) {
    if answer.cache_hit {
        println!("(served from cache)\n");
    }
    for response in &answer.responses {
        print_response(response, registry);
    }
    println!(
        "{} authors, {}ms total",
        answer.responses.len(),
        answer.total_latency_ms
    );
}

/// Render a full debate session.
pub fn print_session(session: &DebateSession, registry: &AuthorRegistry) {
    for round in &session.rounds {
        println!("=== Round {} ({}) ===\n", round.round_number, round.round_type);
        for response in &round.responses {
            print_response(response, registry);
        }
    }
    println!(
        "{} authors, {} rounds, {}ms total",
        session.authors_selected.len(),
        session.rounds.len(),
        session.total_latency_ms
    );
}

/// Drive a streaming query and print events as they arrive. Tokens from
/// concurrently generating authors interleave; a tag line is printed
/// whenever the speaking author changes.
pub async fn stream_events(engine: &DebateEngine, query: &Query, rounds: usize) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(engine.event_channel_capacity());

    let printer = async move {
        let mut current_author: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                DebateEvent::AuthorsSelected {
                    author_ids,
                    selection_method,
                } => {
                    println!("authors: {} ({selection_method})\n", author_ids.join(", "));
                }
                DebateEvent::RoundStart {
                    round_number,
                    round_type,
                } => {
                    println!("=== Round {round_number} ({round_type}) ===");
                    current_author = None;
                }
                DebateEvent::AuthorStart { .. } => {}
                DebateEvent::Token {
                    author_id, token, ..
                } => {
                    if current_author.as_deref() != Some(author_id.as_str()) {
                        println!("\n[{author_id}]");
                        current_author = Some(author_id);
                    }
                    print!("{token}");
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                }
                DebateEvent::ResponseComplete { response, .. } => {
                    if response.failed {
                        println!("\n[{}] <failed>", response.author_id);
                    }
                }
                DebateEvent::RoundEnd { .. } => {
                    println!("\n");
                    current_author = None;
                }
                DebateEvent::Done { stats } => {
                    println!(
                        "done: {}/{} authors, {} rounds, {}ms",
                        stats.surviving_authors,
                        stats.total_authors,
                        stats.rounds_completed,
                        stats.total_latency_ms
                    );
                }
                DebateEvent::Error { message } => {
                    eprintln!("error: {message}");
                }
            }
        }
    };

    if rounds <= 1 {
        let (result, ()) = tokio::join!(engine.answer_streaming(query, tx), printer);
        result?;
    } else {
        let (result, ()) = tokio::join!(engine.debate_streaming(query, rounds, tx), printer);
        result?;
    }
    Ok(())
}
