//! Semantic retrieval over a knowledge-base snapshot: cosine similarity,
//! top-k ranking, and query-embedding memoization.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lru::LruCache;

use crate::embedder::EmbeddingClient;
use crate::knowledge::KnowledgeBase;

/// Default number of passages returned per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Ranked retrieval output: chunk ids with parallel similarity scores.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Chunk ids ordered by descending similarity.
    pub chunk_ids: Vec<usize>,
    /// Cosine similarity per chunk id, same order.
    pub scores: Vec<f32>,
}

impl QueryResult {
    /// True when no chunk matched (empty snapshot or k = 0).
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Iterates `(chunk_id, score)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.chunk_ids.iter().copied().zip(self.scores.iter().copied())
    }
}

/// Raised when a query would be embedded with a different model than the one
/// that produced the snapshot. Scores across models are meaningless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMismatchError {
    /// Model identity recorded in the snapshot.
    pub snapshot_model: String,
    /// Model identity the embedding client is configured with.
    pub client_model: String,
}

impl fmt::Display for ModelMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot was built with embedding model '{}' but the client is configured for '{}'",
            self.snapshot_model, self.client_model
        )
    }
}

impl std::error::Error for ModelMismatchError {}

/// Ranks every stored vector against `query` and keeps the best `k`.
///
/// Pure function of its inputs: descending score order, ties broken by
/// original chunk order, no duplicate ids, at most `k` entries. Zero-norm
/// vectors score 0.
pub fn rank(kb: &KnowledgeBase, query: &[f32], k: usize) -> QueryResult {
    let mut scored: Vec<(usize, usize, f32)> = kb
        .vectors
        .iter()
        .enumerate()
        .map(|(position, record)| (position, record.chunk_id, cosine(query, &record.vector)))
        .collect();
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);

    QueryResult {
        chunk_ids: scored.iter().map(|entry| entry.1).collect(),
        scores: scored.iter().map(|entry| entry.2).collect(),
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embeds user questions and ranks them against a snapshot.
pub struct Retriever {
    client: EmbeddingClient,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
    top_k: usize,
}

impl Retriever {
    /// Builds a retriever for `kb`, refusing mismatched model identities.
    /// `cache_size` of 0 disables query-embedding memoization.
    pub fn for_snapshot(
        client: EmbeddingClient,
        kb: &KnowledgeBase,
        cache_size: usize,
    ) -> Result<Self, ModelMismatchError> {
        if client.model_id() != kb.model_id {
            return Err(ModelMismatchError {
                snapshot_model: kb.model_id.clone(),
                client_model: client.model_id().to_string(),
            });
        }
        let cache = NonZeroUsize::new(cache_size).map(|size| Mutex::new(LruCache::new(size)));
        Ok(Self {
            client,
            cache,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Overrides the default top-k.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Configured top-k.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embeds `text` and returns its top-k chunks from `kb`.
    pub fn query(&self, kb: &KnowledgeBase, text: &str, k: usize) -> Result<QueryResult> {
        let vector = self
            .query_embedding(text)
            .context("failed to embed query")?;
        Ok(rank(kb, &vector, k))
    }

    fn query_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                if let Some(vector) = cache.get(text) {
                    crate::debug_log!("query embedding cache hit");
                    return Ok(vector.clone());
                }
            }
        }
        let vector = self.client.embed_one(text)?;
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(text.to_string(), vector.clone());
            }
        }
        Ok(vector)
    }
}
