//! Vector index adapter
//!
//! One uniform interface over heterogeneous backends: an in-process
//! approximate index, an external vector database, and a key-value-backed
//! flat index. The variants share identical ordering/atomicity semantics
//! but differ in durability and recall; callers must treat every `search`
//! as approximate.

mod flat;
mod hnsw;
mod qdrant;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use qdrant::QdrantIndex;

use crate::document::{ChunkId, DocumentId};
use crate::error::DocsageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Transient backend connectivity failure
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Malformed persisted state; fatal to this backend instance
    #[error("Backend state corrupt: {0}")]
    Corrupt(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl IndexError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }

    /// Attach the backend name and lift into the crate error taxonomy
    pub fn into_crate_error(self, backend: &str) -> DocsageError {
        match self {
            IndexError::Unavailable(reason) => DocsageError::IndexUnavailable {
                backend: backend.to_string(),
                reason,
            },
            IndexError::Corrupt(reason) => DocsageError::IndexCorrupt {
                backend: backend.to_string(),
                reason,
            },
            IndexError::Dimension { expected, actual } => DocsageError::InvalidConfig(format!(
                "Backend '{}' dimension mismatch: expected {}, got {}",
                backend, expected, actual
            )),
        }
    }
}

/// One search hit as reported by a single backend. Raw scores are only
/// meaningful within the result set that produced them.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub chunk_id: ChunkId,
    pub raw_score: f32,
}

/// Metadata stored with each index entry. The backend owns the id, the
/// owning document, and an optional reporting snippet; chunk text itself
/// lives only in the document store.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub document_id: DocumentId,
    pub snippet: Option<String>,
}

/// Metadata filter applied during search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict hits to chunks of one document
    pub document_id: Option<DocumentId>,
}

/// Uniform operations every index backend implements.
///
/// Composition only: backends never share code through inheritance-like
/// layering, each implements the full contract against its own store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or atomically replace the entry for a chunk id. A concurrent
    /// reader sees the old entry or the new one, never neither.
    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), IndexError>;

    /// Remove an entry. Deleting an id that is not present is a no-op.
    async fn delete(&self, chunk_id: ChunkId) -> Result<(), IndexError>;

    /// Nearest-neighbor search, best-first, at most `limit` hits matching
    /// the filter.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RawHit>, IndexError>;

    async fn count(&self) -> Result<u64, IndexError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Shared registry of attached backends.
///
/// The one process-wide dimension is enforced here: a backend whose
/// dimension differs from the configured one is rejected at attach time,
/// before any vector ever reaches it.
pub struct IndexRouter {
    dimension: usize,
    backends: RwLock<HashMap<String, Arc<dyn VectorIndex>>>,
}

impl IndexRouter {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            backends: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Attach a backend, failing fast on a dimension mismatch
    pub fn attach(&self, backend: Arc<dyn VectorIndex>) -> Result<(), DocsageError> {
        if backend.dimension() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: backend.dimension(),
            }
            .into_crate_error(backend.name()));
        }

        let name = backend.name().to_string();
        let mut backends = self.backends.write().unwrap();
        if backends.contains_key(&name) {
            return Err(DocsageError::InvalidConfig(format!(
                "Backend '{}' attached twice",
                name
            )));
        }

        tracing::info!("Attached index backend '{}' ({}D)", name, self.dimension);
        backends.insert(name, backend);
        Ok(())
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn VectorIndex>> {
        self.backends.read().unwrap().get(name).cloned()
    }

    /// Snapshot of every attached backend
    pub fn backends(&self) -> Vec<Arc<dyn VectorIndex>> {
        self.backends.read().unwrap().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Upsert into every attached backend
    pub async fn upsert_all(
        &self,
        chunk_id: ChunkId,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), DocsageError> {
        for backend in self.backends() {
            backend
                .upsert(chunk_id, vector, metadata)
                .await
                .map_err(|e| e.into_crate_error(backend.name()))?;
        }
        Ok(())
    }

    /// Delete from every attached backend
    pub async fn delete_all(&self, chunk_id: ChunkId) -> Result<(), DocsageError> {
        for backend in self.backends() {
            backend
                .delete(chunk_id)
                .await
                .map_err(|e| e.into_crate_error(backend.name()))?;
        }
        Ok(())
    }
}
