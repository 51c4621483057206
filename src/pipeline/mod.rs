//! Ingestion pipeline: extract, store, chunk, embed, index
//!
//! Documents are processed by a bounded set of parallel workers; within one
//! document, chunk order is preserved through the order-preserving batcher
//! so the chunk-to-vector correspondence by position is never violated.
//! Critical memory pressure pauses the intake of new documents; in-flight
//! work always finishes.

use crate::document::{Chunk, Chunker, Document, DocumentExtractor, DocumentId};
use crate::embedding::{EmbedRole, EmbeddingBatcher};
use crate::error::{DocsageError, Result};
use crate::index::{EntryMetadata, IndexRouter};
use crate::monitor::{Pressure, PressureLevel};
use crate::storage::{DocumentStore, InsertOutcome};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// Outcome of ingesting one document
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub source_path: PathBuf,
    pub chunks_indexed: usize,
    pub pages_total: usize,
    pub pages_failed: usize,
    /// True when identical content was already present and nothing changed
    pub duplicate: bool,
    /// Chunk ids removed because this source's content changed
    pub superseded_chunks: usize,
}

/// Bounded-worker ingestion pipeline
pub struct IngestPipeline {
    extractor: Arc<dyn DocumentExtractor>,
    store: Arc<DocumentStore>,
    batcher: Arc<EmbeddingBatcher>,
    router: Arc<IndexRouter>,
    chunker: Chunker,
    pressure: watch::Receiver<Pressure>,
    workers: Arc<Semaphore>,
}

impl IngestPipeline {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        store: Arc<DocumentStore>,
        batcher: Arc<EmbeddingBatcher>,
        router: Arc<IndexRouter>,
        chunker: Chunker,
        pressure: watch::Receiver<Pressure>,
        max_workers: usize,
    ) -> Self {
        Self {
            extractor,
            store,
            batcher,
            router,
            chunker,
            pressure,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Ingest one file from raw bytes
    pub async fn ingest_bytes(&self, source_path: &Path, data: &[u8]) -> Result<IngestReport> {
        self.wait_for_capacity().await;

        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DocsageError::Other(anyhow::anyhow!("Worker pool closed: {}", e)))?;

        self.process(source_path, data).await
    }

    /// Read and ingest one file from disk
    pub async fn ingest_file(&self, source_path: &Path) -> Result<IngestReport> {
        let data = tokio::fs::read(source_path)
            .await
            .map_err(|e| DocsageError::Io {
                source: e,
                context: format!("Failed to read {}", source_path.display()),
            })?;

        self.ingest_bytes(source_path, &data).await
    }

    /// Ingest many files concurrently, bounded by the worker pool. Each
    /// document fails or succeeds independently.
    pub async fn ingest_files(&self, paths: &[PathBuf]) -> Vec<Result<IngestReport>> {
        join_all(paths.iter().map(|path| self.ingest_file(path))).await
    }

    /// Cooperative backpressure: new documents are not admitted while the
    /// monitor reports critical pressure
    async fn wait_for_capacity(&self) {
        let mut pressure = self.pressure.clone();

        while pressure.borrow().level == PressureLevel::Critical {
            info!("Pausing ingestion intake under critical memory pressure");
            if pressure.changed().await.is_err() {
                // Monitor gone; do not deadlock intake on a dead channel
                return;
            }
        }
    }

    async fn process(&self, source_path: &Path, data: &[u8]) -> Result<IngestReport> {
        // Extract pages; per-page failures are recorded, not fatal
        let pages = self
            .extractor
            .extract(data)
            .map_err(|e| DocsageError::Other(anyhow::anyhow!("Extraction failed: {}", e)))?;

        let document = Document::new(source_path.to_path_buf(), pages);
        let pages_total = document.pages.len();
        let pages_failed = document.failed_pages().len();

        if pages_failed > 0 {
            warn!(
                "{}: {} of {} pages failed extraction, continuing with the rest",
                source_path.display(),
                pages_failed,
                pages_total
            );
        }

        // Idempotent upsert: identical content short-circuits
        let outcome = self.store.insert_document(&document)?;

        if outcome == InsertOutcome::Duplicate {
            debug!("{}: identical content already ingested", source_path.display());
            return Ok(IngestReport {
                document_id: document.id.clone(),
                source_path: source_path.to_path_buf(),
                chunks_indexed: self.store.chunk_ids_for_document(&document.id)?.len(),
                pages_total,
                pages_failed,
                duplicate: true,
                superseded_chunks: 0,
            });
        }

        // Purge superseded chunks from every backend before re-indexing
        let superseded_chunks = match &outcome {
            InsertOutcome::Superseded { old_chunks } => {
                for chunk_id in old_chunks {
                    self.router.delete_all(*chunk_id).await?;
                }
                old_chunks.len()
            }
            _ => 0,
        };

        // Chunk lazily, embed in order, index
        let chunks: Vec<Chunk> = self.chunker.chunk(&document).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let vectors = self.batcher.embed(&texts, EmbedRole::Document).await?;

        // The batcher is order-preserving, so position zips chunks to vectors
        debug_assert_eq!(vectors.len(), chunks.len());

        self.store.replace_chunks(&document.id, &chunks)?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let metadata = EntryMetadata {
                document_id: document.id.clone(),
                snippet: Some(snippet_of(&chunk.text).to_string()),
            };
            self.router.upsert_all(chunk.id, vector, &metadata).await?;
        }

        info!(
            "Ingested {} ({} chunks, {} pages, {} failed pages)",
            source_path.display(),
            chunks.len(),
            pages_total,
            pages_failed
        );

        Ok(IngestReport {
            document_id: document.id,
            source_path: source_path.to_path_buf(),
            chunks_indexed: chunks.len(),
            pages_total,
            pages_failed,
            duplicate: false,
            superseded_chunks,
        })
    }
}

/// Short reporting snippet stored alongside index entries
fn snippet_of(text: &str) -> &str {
    let mut end = text.len().min(120);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let text = "é".repeat(100);
        let snippet = snippet_of(&text);
        assert!(snippet.len() <= 120);
        assert!(text.starts_with(snippet));
    }
}
