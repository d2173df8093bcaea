//! Vector store contract and reference implementation.
//!
//! The engine consumes a vector store, it does not implement one: `search`
//! is the only operation the core needs, and it is always scoped to a single
//! author's corpus so one author's response can never cite another's texts.
//! `MemoryVectorStore` is the in-process reference implementation used by
//! tests and the CLI demo; production deployments plug in their own.

use crate::embeddings::cosine_similarity;
use crate::error::RetrievalError;
use crate::types::RetrievedChunk;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tracing::debug;

/// Trait for vector stores holding per-author corpus chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return the top-`k` chunks from `author_id`'s corpus nearest to
    /// `query_vector`, best first.
    async fn search(
        &self,
        author_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

/// A chunk as stored: text, source locator, and its embedding.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// In-memory vector store partitioned by author id.
///
/// Search is a cosine scan over the author's partition; adequate for the
/// corpus sizes the demo and tests use.
#[derive(Default)]
pub struct MemoryVectorStore {
    partitions: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk into an author's partition.
    pub fn insert(&self, author_id: &str, chunk: StoredChunk) {
        let mut partitions = self.partitions.write().unwrap_or_else(|e| e.into_inner());
        partitions.entry(author_id.to_string()).or_default().push(chunk);
    }

    /// Number of chunks stored for an author.
    pub fn chunk_count(&self, author_id: &str) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(|e| e.into_inner());
        partitions.get(author_id).map_or(0, |c| c.len())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(
        &self,
        author_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| RetrievalError::StoreUnavailable {
                message: "store lock poisoned".to_string(),
            })?;

        let Some(chunks) = partitions.get(author_id) else {
            debug!(author = author_id, "No corpus partition for author");
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .map(|c| RetrievedChunk {
                text: c.text.clone(),
                source: c.source.clone(),
                similarity: cosine_similarity(query_vector, &c.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// A vector store wrapper that bounds concurrent searches with a semaphore.
///
/// Sized independently of the per-round author fan-out so a wide panel
/// queues on the store instead of exhausting downstream connection limits.
pub struct PooledStore {
    inner: Arc<dyn VectorStore>,
    permits: Arc<Semaphore>,
}

impl PooledStore {
    pub fn new(inner: Arc<dyn VectorStore>, max_concurrency: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

#[async_trait]
impl VectorStore for PooledStore {
    async fn search(
        &self,
        author_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let _permit =
            self.permits
                .acquire()
                .await
                .map_err(|_| RetrievalError::StoreUnavailable {
                    message: "store pool closed".to_string(),
                })?;
        self.inner.search(author_id, query_vector, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, source: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            text: text.into(),
            source: source.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_is_author_scoped() {
        let store = MemoryVectorStore::new();
        store.insert("marx", chunk("on capital", "Capital I", vec![1.0, 0.0]));
        store.insert("whitman", chunk("on grass", "Leaves of Grass", vec![1.0, 0.0]));

        let results = store.search("marx", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "on capital");
        assert_eq!(results[0].source, "Capital I");
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = MemoryVectorStore::new();
        store.insert("marx", chunk("far", "a", vec![0.0, 1.0]));
        store.insert("marx", chunk("near", "b", vec![1.0, 0.0]));
        store.insert("marx", chunk("middle", "c", vec![1.0, 1.0]));

        let results = store.search("marx", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].text, "near");
        assert_eq!(results[1].text, "middle");
        assert_eq!(results[2].text, "far");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn test_search_truncates_to_k() {
        let store = MemoryVectorStore::new();
        for i in 0..10 {
            store.insert("marx", chunk(&format!("chunk {i}"), "src", vec![1.0, i as f32]));
        }
        let results = store.search("marx", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn test_search_unknown_author_is_empty() {
        let store = MemoryVectorStore::new();
        let results = store.search("nietzsche", &[1.0], 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_chunk_count() {
        let store = MemoryVectorStore::new();
        assert_eq!(store.chunk_count("marx"), 0);
        store.insert("marx", chunk("a", "s", vec![1.0]));
        store.insert("marx", chunk("b", "s", vec![1.0]));
        assert_eq!(store.chunk_count("marx"), 2);
    }

    #[tokio::test]
    async fn test_pooled_store_delegates() {
        let inner = Arc::new(MemoryVectorStore::new());
        inner.insert("marx", chunk("on capital", "Capital I", vec![1.0, 0.0]));
        let pooled = PooledStore::new(inner, 2);

        let results = pooled.search("marx", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_pooled_store_queues_excess_calls() {
        // With a single permit, concurrent searches serialize rather than fail.
        let inner = Arc::new(MemoryVectorStore::new());
        inner.insert("marx", chunk("text", "src", vec![1.0]));
        let pooled = Arc::new(PooledStore::new(inner, 1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&pooled);
            handles.push(tokio::spawn(async move {
                store.search("marx", &[1.0], 1).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
