//! Symposium CLI — ask a panel of authors, or let them debate.
//!
//! Wires the engine's collaborators together from configuration: embedder,
//! in-memory vector store (loaded from a corpus file), generation backend,
//! and the author registry. The response cache lives and dies with this
//! process.

mod corpus;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use symposium_core::{
    DebateEngine, MemoryVectorStore, Query, create_embedder, create_generator, load_config,
    load_registry,
};
use tracing_subscriber::EnvFilter;

/// Symposium: a debate panel of authors, each grounded in their own corpus
#[derive(Parser, Debug)]
#[command(name = "symposium", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./symposium.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Author registry file
    #[arg(long, default_value = "demos/authors.toml")]
    registry: PathBuf,

    /// Corpus file with per-author text chunks
    #[arg(long, default_value = "demos/corpus.toml")]
    corpus: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ask the panel a single-round question
    Ask {
        /// The question to pose
        question: String,
        /// Comma-separated author ids (bypasses semantic routing)
        #[arg(short, long)]
        authors: Option<String>,
        /// Stream tokens as they are generated
        #[arg(long)]
        stream: bool,
    },
    /// Run a multi-round debate
    Debate {
        /// The question to debate
        question: String,
        /// Number of rounds (round 1 initial, later rounds rebuttal)
        #[arg(short, long)]
        rounds: Option<usize>,
        /// Comma-separated author ids (bypasses semantic routing)
        #[arg(short, long)]
        authors: Option<String>,
        /// Stream tokens as they are generated
        #[arg(long)]
        stream: bool,
    },
    /// List the registered authors
    Authors,
}

/// Split a comma-separated author list into trimmed, non-empty ids.
fn parse_author_ids(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_query(question: String, authors: Option<&str>) -> Query {
    match authors {
        Some(spec) => Query::for_authors(question, parse_author_ids(spec)),
        None => Query::new(question),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    let embedder = create_embedder(&config.embedding);

    let registry_text = std::fs::read_to_string(&cli.registry)
        .with_context(|| format!("reading author registry {}", cli.registry.display()))?;
    let registry = Arc::new(
        load_registry(&registry_text, embedder.as_ref())
            .await
            .context("loading author registry")?,
    );

    let store = Arc::new(MemoryVectorStore::new());
    if cli.corpus.exists() {
        let corpus_text = std::fs::read_to_string(&cli.corpus)
            .with_context(|| format!("reading corpus {}", cli.corpus.display()))?;
        let loaded = corpus::load_corpus(&corpus_text, store.as_ref(), embedder.as_ref())
            .await
            .context("loading corpus")?;
        tracing::info!(chunks = loaded, "Corpus loaded");
    } else {
        tracing::warn!(
            path = %cli.corpus.display(),
            "Corpus file not found; responses will have no retrieved context"
        );
    }

    if matches!(cli.command, Commands::Authors) {
        for author in registry.all() {
            let expertise = if author.expertise.is_empty() {
                String::new()
            } else {
                format!(" - {}", author.expertise.join(", "))
            };
            println!("{:<14} {}{}", author.id, author.name, expertise);
        }
        return Ok(());
    }

    let generator = create_generator(&config.generator).context("creating generation backend")?;

    let engine = DebateEngine::new(registry.clone(), embedder, store, generator, config);

    match cli.command {
        Commands::Authors => unreachable!("handled above"),
        Commands::Ask {
            question,
            authors,
            stream,
        } => {
            let query = build_query(question, authors.as_deref());
            if stream {
                output::stream_events(&engine, &query, 1).await?;
            } else {
                let answer = engine.answer(&query).await?;
                output::print_answer(&answer, registry.as_ref());
            }
        }
        Commands::Debate {
            question,
            rounds,
            authors,
            stream,
        } => {
            let query = build_query(question, authors.as_deref());
            let rounds = rounds.unwrap_or_else(|| engine.default_rounds());
            if stream {
                output::stream_events(&engine, &query, rounds).await?;
            } else {
                let session = engine.debate(&query, rounds).await?;
                output::print_session(&session, registry.as_ref());
            }
        }
    }

    Ok(())
}
