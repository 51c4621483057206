/// In-process HNSW backend for approximate nearest-neighbor search
use super::{EntryMetadata, IndexError, RawHit, SearchFilter, VectorIndex};
use crate::document::{ChunkId, DocumentId};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// HNSW vector index wrapper (cosine similarity).
///
/// Volatile: contents are lost on restart and rebuilt from the document
/// store. The graph structure has no hard delete, so removed or replaced
/// entries are tombstoned and filtered out of search results; the slot
/// maps keep chunk ids stable across replacements.
pub struct HnswIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    ef_search: usize,
    state: RwLock<SlotState>,
}

#[derive(Default)]
struct SlotState {
    /// chunk id -> live internal slot
    slots: HashMap<ChunkId, usize>,
    /// internal slot -> chunk id, for mapping search results back
    reverse: HashMap<usize, ChunkId>,
    /// owning document per live chunk, consulted by metadata filters
    documents: HashMap<ChunkId, DocumentId>,
    /// slots whose entries were deleted or replaced
    tombstones: HashSet<usize>,
    next_slot: usize,
}

impl HnswIndex {
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    /// * `ef_construction` - Construction parameter (higher = better recall, slower build)
    /// * `m` - Number of connections per layer
    /// * `ef_search` - Search parameter (higher = better recall, slower search)
    pub fn new(dimension: usize, ef_construction: usize, m: usize, ef_search: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            dimension,
            ef_construction,
            200, // max_nb_connection
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            dimension,
            ef_search,
            state: RwLock::new(SlotState::default()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for HnswIndex {
    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), IndexError> {
        self.check_dimension(vector)?;

        let data = vector.to_vec();

        // Reserve the slot first, insert the graph node, then swap the
        // slot maps under one write lock so a concurrent reader resolves
        // the old entry or the new one, never neither
        let slot = {
            let mut state = self.state.write().unwrap();
            let slot = state.next_slot;
            state.next_slot += 1;
            slot
        };

        {
            let index = self.index.write().unwrap();
            index.insert((&data, slot));
        }

        let mut state = self.state.write().unwrap();
        if let Some(old_slot) = state.slots.insert(chunk_id, slot) {
            state.reverse.remove(&old_slot);
            state.tombstones.insert(old_slot);
        }
        state.reverse.insert(slot, chunk_id);
        state.documents.insert(chunk_id, metadata.document_id.clone());

        Ok(())
    }

    async fn delete(&self, chunk_id: ChunkId) -> Result<(), IndexError> {
        let mut state = self.state.write().unwrap();
        if let Some(slot) = state.slots.remove(&chunk_id) {
            state.reverse.remove(&slot);
            state.documents.remove(&chunk_id);
            state.tombstones.insert(slot);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RawHit>, IndexError> {
        self.check_dimension(query)?;

        if limit == 0 {
            return Ok(Vec::new());
        }

        // Over-request so tombstoned or filtered-out slots cannot starve
        // the result set; a metadata filter may reject arbitrarily many
        // hits, so it widens the request to every live entry
        let (tombstone_count, live) = {
            let state = self.state.read().unwrap();
            (state.tombstones.len(), state.slots.len())
        };
        let k = match filter {
            Some(_) => live + tombstone_count,
            None => limit + tombstone_count,
        }
        .max(limit);

        let neighbours = {
            let index = self.index.read().unwrap();
            index.search(query, k, self.ef_search.max(k))
        };

        let state = self.state.read().unwrap();
        let hits = neighbours
            .into_iter()
            .filter_map(|n| {
                let chunk_id = *state.reverse.get(&n.d_id)?;

                if let Some(filter) = filter {
                    if let Some(wanted) = &filter.document_id {
                        if state.documents.get(&chunk_id) != Some(wanted) {
                            return None;
                        }
                    }
                }

                Some(RawHit {
                    chunk_id,
                    raw_score: 1.0 - n.distance, // distance -> similarity
                })
            })
            .take(limit)
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.state.read().unwrap().slots.len() as u64)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hnsw"
    }
}
