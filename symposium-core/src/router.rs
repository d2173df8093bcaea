//! Semantic router for author selection.
//!
//! Maps a query to an ordered list of participating authors plus a
//! selection-method tag. The query is embedded exactly once; the resulting
//! vector rides along in the `Selection` so retrieval and cache matching
//! never re-embed.

use crate::authors::{Author, AuthorRegistry};
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::SelectionError;
use crate::types::{Query, SelectionMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default selection bounds, applied when a query does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum similarity score to include an author.
    pub relevance_threshold: f32,
    /// Minimum number of authors to select.
    pub min_authors: usize,
    /// Maximum number of authors to select.
    pub max_authors: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            min_authors: 2,
            max_authors: 5,
        }
    }
}

/// Result of the routing step.
#[derive(Clone, Debug)]
pub struct Selection {
    /// Participating authors, in selection order.
    pub authors: Vec<Arc<Author>>,
    /// Similarity score for every registered author.
    pub scores: HashMap<String, f32>,
    pub method: SelectionMethod,
    /// The embedded query, reused for retrieval and cache matching.
    pub query_vector: Vec<f32>,
    pub threshold_used: f32,
}

impl Selection {
    /// Selected author ids in order.
    pub fn author_ids(&self) -> Vec<String> {
        self.authors.iter().map(|a| a.id.clone()).collect()
    }
}

/// Routes queries to relevant authors by profile similarity.
pub struct SemanticRouter {
    registry: Arc<AuthorRegistry>,
    embedder: Arc<dyn Embedder>,
}

impl SemanticRouter {
    pub fn new(registry: Arc<AuthorRegistry>, embedder: Arc<dyn Embedder>) -> Self {
        Self { registry, embedder }
    }

    /// Select the participating authors for a query.
    ///
    /// Explicitly specified authors bypass similarity selection entirely
    /// (membership and order come from the caller); otherwise authors above
    /// the relevance threshold are taken by similarity descending, padding
    /// from the best of the rest when too few clear it.
    pub async fn select(&self, query: &Query) -> Result<Selection, SelectionError> {
        query.validate()?;

        if self.registry.is_empty() {
            return Err(SelectionError::NoAuthors);
        }

        let query_vector = self.embedder.embed(&query.text).await?;

        let scores: HashMap<String, f32> = self
            .registry
            .all()
            .iter()
            .map(|a| {
                (
                    a.id.clone(),
                    cosine_similarity(&query_vector, &a.profile_vector),
                )
            })
            .collect();

        if !query.specified_author_ids.is_empty() {
            return self.select_specified(query, scores, query_vector);
        }

        self.select_semantic(query, scores, query_vector)
    }

    /// Caller named the authors: existence-check each and return exactly
    /// those, in the caller's order.
    fn select_specified(
        &self,
        query: &Query,
        scores: HashMap<String, f32>,
        query_vector: Vec<f32>,
    ) -> Result<Selection, SelectionError> {
        let mut authors = Vec::with_capacity(query.specified_author_ids.len());
        for id in &query.specified_author_ids {
            authors.push(self.registry.require(id)?);
        }

        info!(
            authors = authors.len(),
            method = %SelectionMethod::Specified,
            "Authors specified by caller"
        );

        Ok(Selection {
            authors,
            scores,
            method: SelectionMethod::Specified,
            query_vector,
            threshold_used: query.relevance_threshold,
        })
    }

    fn select_semantic(
        &self,
        query: &Query,
        scores: HashMap<String, f32>,
        query_vector: Vec<f32>,
    ) -> Result<Selection, SelectionError> {
        let threshold = query.relevance_threshold;
        let ranked = rank_by_score(&scores);

        let above: Vec<&(String, f32)> =
            ranked.iter().filter(|(_, s)| *s >= threshold).collect();

        let (selected_ids, method) = if above.len() >= query.min_authors {
            let take = query.max_authors.min(above.len());
            let ids: Vec<String> = above.iter().take(take).map(|(id, _)| id.clone()).collect();
            info!(
                selected = ids.len(),
                threshold = threshold,
                "Selected authors above relevance threshold"
            );
            (ids, SelectionMethod::Threshold)
        } else {
            let take = query.min_authors.min(ranked.len());
            let ids: Vec<String> = ranked.iter().take(take).map(|(id, _)| id.clone()).collect();
            warn!(
                above_threshold = above.len(),
                min_authors = query.min_authors,
                selected = ids.len(),
                "Too few authors above threshold, falling back to top-k"
            );
            (ids, SelectionMethod::FallbackTopK)
        };

        let authors = selected_ids
            .iter()
            .map(|id| self.registry.require(id))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(method = %method, ids = ?selected_ids, "Routing complete");

        Ok(Selection {
            authors,
            scores,
            method,
            query_vector,
            threshold_used: threshold,
        })
    }
}

/// Rank (id, score) pairs by score descending, breaking ties by author id
/// ascending for determinism.
fn rank_by_score(scores: &HashMap<String, f32>) -> Vec<(String, f32)> {
    let mut ranked: Vec<(String, f32)> =
        scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
