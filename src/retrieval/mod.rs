//! Retrieval & ranking
//!
//! Executes a query end to end: embed it, search one or more index
//! backends with over-fetch, normalize per-backend scores onto a common
//! scale, merge and deduplicate, and keep the top-k.

mod engine;
mod normalize;

pub use engine::Retriever;
pub use normalize::{merge_hits, normalize_hits};

use crate::document::ChunkId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One merged hit. The score is normalized and comparable across backends;
/// `backend` names the backend that contributed the winning score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub backend: String,
}

/// Ranked, deduplicated result of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Best-first hits, at most top_k of them
    pub hits: Vec<ScoredHit>,
    /// Raw hit count per backend before merging, for observability
    pub backend_hit_counts: HashMap<String, usize>,
}

impl RetrievalResult {
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.hits.iter().map(|h| h.chunk_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
