/// External vector-database backend (Qdrant)
use super::{EntryMetadata, IndexError, RawHit, SearchFilter, VectorIndex};
use crate::document::ChunkId;
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::time::Duration;

/// Qdrant-backed index. Durable and served out of process; every operation
/// is a network call bounded by the configured timeout, and transport
/// failures surface as `Unavailable` for the caller's retry policy.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect and ensure the collection exists with the expected dimension
    pub async fn connect(
        url: &str,
        collection: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url)
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let exists = client
            .collection_exists(collection)
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        if !exists {
            tracing::info!("Creating qdrant collection '{}' ({}D)", collection, dimension);
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        }

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
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
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), IndexError> {
        self.check_dimension(vector)?;

        let mut payload = Payload::new();
        payload.insert("document_id", metadata.document_id.to_hex());
        if let Some(snippet) = &metadata.snippet {
            payload.insert("snippet", snippet.as_str());
        }

        let point = PointStruct::new(chunk_id.0, vector.to_vec(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, chunk_id: ChunkId) -> Result<(), IndexError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList {
                        ids: vec![chunk_id.0.into()],
                    })
                    .wait(true),
            )
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

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

        let mut request =
            SearchPointsBuilder::new(&self.collection, query.to_vec(), limit as u64);

        if let Some(document_id) = filter.and_then(|f| f.document_id.as_ref()) {
            request = request.filter(Filter::must([Condition::matches(
                "document_id",
                document_id.to_hex(),
            )]));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Num(n)) => ChunkId(n),
                    // UUID point ids never originate here; skip foreign entries
                    _ => return None,
                };
                Some(RawHit {
                    chunk_id: id,
                    raw_score: point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
