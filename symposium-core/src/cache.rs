//! Response cache with semantic similarity matching.
//!
//! Intercepts single-response (non-debate) queries to short-circuit repeated
//! or near-duplicate generation work. Lookup is two-phase: an exact match on
//! the hash of the normalized query text, then a cosine scan of the stored
//! query vectors. Entries expire lazily after a TTL and the table is bounded
//! by an LRU eviction policy, so the cache cannot grow without limit.
//!
//! Failure semantics: a cache problem never fails the request; it degrades
//! to a miss, logged but not surfaced.

use crate::embeddings::cosine_similarity;
use crate::error::CacheError;
use crate::types::Answer;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,
    /// Entry time-to-live in seconds (lazy expiry).
    pub ttl_secs: u64,
    /// Cosine similarity at or above which a stored query counts as a hit.
    pub similarity_threshold: f32,
    /// Maximum live entries; least-recently-used entries are evicted.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            similarity_threshold: 0.95,
            max_entries: 1024,
        }
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    query_vector: Vec<f32>,
    payload: Answer,
    created_at: Instant,
    hit_count: u64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Shared mutable cache state behind one coarse lock.
///
/// Write rate is low relative to reads, and lookups are in-memory and
/// non-blocking, so a single mutex is sufficient.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1))
            .expect("max(1) guarantees a non-zero capacity");
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            config,
        }
    }

    /// Look up a cached payload for a query and its embedding.
    ///
    /// Phase 1 is an exact match on the normalized query hash; phase 2 scans
    /// live entries for a stored query vector within the similarity
    /// threshold. Expired entries encountered along the way are removed.
    pub fn get(&self, query_text: &str, query_vector: &[f32]) -> Option<Answer> {
        if !self.config.enabled {
            return None;
        }
        match self.try_get(query_text, query_vector) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn try_get(
        &self,
        query_text: &str,
        query_vector: &[f32],
    ) -> Result<Option<Answer>, CacheError> {
        let mut inner = self.inner.lock().map_err(|_| CacheError::Poisoned)?;
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let hash = hash_query(query_text);

        // Phase 1: exact match.
        let mut exact_expired = false;
        if let Some(entry) = inner.entries.get_mut(&hash) {
            if entry.created_at.elapsed() > ttl {
                exact_expired = true;
            } else {
                entry.hit_count += 1;
                let payload = served(&entry.payload);
                inner.hits += 1;
                debug!(hash = hash.as_str(), "Cache hit (exact)");
                return Ok(Some(payload));
            }
        }
        if exact_expired {
            inner.entries.pop(&hash);
        }

        // Phase 2: semantic match over live entries.
        let mut expired_keys = Vec::new();
        let mut matched_key = None;
        for (key, entry) in inner.entries.iter() {
            if entry.created_at.elapsed() > ttl {
                expired_keys.push(key.clone());
                continue;
            }
            let similarity = cosine_similarity(query_vector, &entry.query_vector);
            if similarity >= self.config.similarity_threshold {
                debug!(similarity, "Cache hit (semantic)");
                matched_key = Some(key.clone());
                break;
            }
        }
        for key in expired_keys {
            inner.entries.pop(&key);
        }
        if let Some(key) = matched_key {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.hit_count += 1;
                let payload = served(&entry.payload);
                inner.hits += 1;
                return Ok(Some(payload));
            }
        }

        inner.misses += 1;
        debug!("Cache miss");
        Ok(None)
    }

    /// Insert a freshly generated payload, keyed by the normalized query
    /// hash. Evicts the least-recently-used entry when full.
    pub fn insert(&self, query_text: &str, query_vector: &[f32], payload: &Answer) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            warn!("Cache lock poisoned, dropping insert");
            return;
        };

        let hash = hash_query(query_text);
        let mut stored = payload.clone();
        stored.cache_hit = false;

        let evicted = inner.entries.push(
            hash.clone(),
            CacheEntry {
                query_vector: query_vector.to_vec(),
                payload: stored,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
        if let Some((evicted_key, _)) = evicted
            && evicted_key != hash
        {
            inner.evictions += 1;
        }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(inner) => CacheStats {
                size: inner.entries.len(),
                hits: inner.hits,
                misses: inner.misses,
                evictions: inner.evictions,
            },
            Err(_) => CacheStats::default(),
        }
    }

    /// Drop all entries and reset statistics.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.hits = 0;
            inner.misses = 0;
            inner.evictions = 0;
        }
    }
}

/// Mark a stored payload as served-from-cache.
fn served(payload: &Answer) -> Answer {
    let mut payload = payload.clone();
    payload.cache_hit = true;
    payload
}

/// SHA-256 over the case-folded, whitespace-trimmed query text.
fn hash_query(query_text: &str) -> String {
    let normalized = query_text.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
