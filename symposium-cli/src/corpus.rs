//! Corpus file loading for the demo vector store.
//!
//! The corpus file is pre-chunked text per author; chunk embeddings are
//! computed once at startup. Acquisition and chunking of source texts
//! happen outside this tool.

use anyhow::{Context, Result};
use serde::Deserialize;
use symposium_core::{Embedder, MemoryVectorStore, StoredChunk};

#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    chunks: Vec<ChunkEntry>,
}

#[derive(Debug, Deserialize)]
struct ChunkEntry {
    author_id: String,
    #[serde(default)]
    source: String,
    text: String,
}

/// Parse a corpus TOML file and insert embedded chunks into the store.
/// Returns the number of chunks loaded.
pub async fn load_corpus(
    toml_text: &str,
    store: &MemoryVectorStore,
    embedder: &dyn Embedder,
) -> Result<usize> {
    let file: CorpusFile = toml::from_str(toml_text).context("parsing corpus file")?;

    let mut loaded = 0;
    for entry in file.chunks {
        let embedding = embedder
            .embed(&entry.text)
            .await
            .with_context(|| format!("embedding chunk for {}", entry.author_id))?;
        store.insert(
            &entry.author_id,
            StoredChunk {
                text: entry.text,
                source: entry.source,
                embedding,
            },
        );
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symposium_core::embeddings::HashEmbedder;

    #[tokio::test]
    async fn test_load_corpus() {
        let toml_text = r#"
            [[chunks]]
            author_id = "marx"
            source = "Capital, Vol. I"
            text = "Capital is dead labour."

            [[chunks]]
            author_id = "whitman"
            text = "I celebrate myself, and sing myself."
        "#;

        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::new(64);
        let loaded = load_corpus(toml_text, &store, &embedder).await.unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(store.chunk_count("marx"), 1);
        assert_eq!(store.chunk_count("whitman"), 1);
    }

    #[tokio::test]
    async fn test_load_corpus_bad_toml() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::new(64);
        assert!(load_corpus("nope [", &store, &embedder).await.is_err());
    }
}
