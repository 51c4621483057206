//! Score normalization and cross-backend merging
//!
//! Raw distance metrics differ across backends and must never be compared
//! directly. Each backend's result set is min-max normalized onto [0, 1]
//! first; only then are hits merged by chunk id.

use super::ScoredHit;
use crate::document::ChunkId;
use crate::index::RawHit;
use std::collections::HashMap;

/// Min-max normalize one backend's result set onto [0, 1].
///
/// A single-hit or constant-score result set carries no rank information
/// and normalizes to 1.0 throughout.
pub fn normalize_hits(hits: &[RawHit]) -> Vec<(ChunkId, f32)> {
    if hits.is_empty() {
        return Vec::new();
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for hit in hits {
        min = min.min(hit.raw_score);
        max = max.max(hit.raw_score);
    }

    let range = max - min;
    hits.iter()
        .map(|hit| {
            let score = if range <= f32::EPSILON {
                1.0
            } else {
                (hit.raw_score - min) / range
            };
            (hit.chunk_id, score)
        })
        .collect()
}

/// Merge normalized per-backend results by chunk id.
///
/// Deduplication rule: the highest normalized score wins per id; an equal
/// score from a later backend never displaces an earlier one, so callers
/// pass backends in a stable (sorted) order. The final ordering is score
/// descending with ties broken by lowest chunk id.
pub fn merge_hits(per_backend: Vec<(String, Vec<(ChunkId, f32)>)>) -> Vec<ScoredHit> {
    let mut best: HashMap<ChunkId, ScoredHit> = HashMap::new();

    for (backend, hits) in per_backend {
        for (chunk_id, score) in hits {
            match best.get(&chunk_id) {
                Some(existing) if existing.score >= score => {}
                _ => {
                    best.insert(
                        chunk_id,
                        ScoredHit {
                            chunk_id,
                            score,
                            backend: backend.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut merged: Vec<ScoredHit> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    merged
}
