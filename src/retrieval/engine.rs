//! Multi-backend retrieval engine

use super::{merge_hits, normalize_hits, RetrievalResult};
use crate::backoff;
use crate::config::RetrievalConfig;
use crate::embedding::{EmbedRole, EmbeddingBatcher};
use crate::error::{DocsageError, Result};
use crate::index::{IndexRouter, RawHit, SearchFilter, VectorIndex};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, warn};

/// Executes queries: embeds the text, fans out to the named backends with
/// an over-fetch factor, normalizes and merges the results, and keeps the
/// top-k. Independent per request; safe to share across query workers.
pub struct Retriever {
    batcher: Arc<EmbeddingBatcher>,
    router: Arc<IndexRouter>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        batcher: Arc<EmbeddingBatcher>,
        router: Arc<IndexRouter>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            batcher,
            router,
            config,
        }
    }

    pub fn router(&self) -> &Arc<IndexRouter> {
        &self.router
    }

    /// Retrieve the top-k chunks for a query across the named backends.
    /// An empty backend list means every attached backend.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        backend_names: &[&str],
        filter: Option<&SearchFilter>,
    ) -> Result<RetrievalResult> {
        if query_text.trim().is_empty() {
            return Err(DocsageError::InvalidConfig(
                "Query text cannot be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(DocsageError::InvalidConfig(
                "top_k must be greater than 0".to_string(),
            ));
        }

        let backends = self.resolve_backends(backend_names)?;

        // Embed the query through the same batcher the write path uses
        let mut vectors = self
            .batcher
            .embed(&[query_text.to_string()], EmbedRole::Query)
            .await?;
        let query_vector = vectors.pop().ok_or_else(|| {
            DocsageError::EmbeddingUnavailable("No query embedding produced".to_string())
        })?;

        // Over-fetch per backend so deduplication cannot shrink the final
        // set below top_k when backends overlap
        let fetch = top_k * self.config.fanout;

        let searches = backends.iter().map(|backend| {
            let backend = backend.clone();
            let vector = query_vector.clone();
            async move {
                let hits = self.search_with_retry(&backend, &vector, fetch, filter).await;
                (backend.name().to_string(), hits)
            }
        });

        let mut per_backend = Vec::new();
        let mut backend_hit_counts = HashMap::new();
        let mut last_failure: Option<DocsageError> = None;

        for (name, outcome) in join_all(searches).await {
            match outcome {
                Ok(hits) => {
                    debug!("Backend '{}' returned {} hits", name, hits.len());
                    backend_hit_counts.insert(name.clone(), hits.len());

                    let normalized: Vec<_> = normalize_hits(&hits)
                        .into_iter()
                        .filter(|(_, score)| *score >= self.config.min_score)
                        .collect();
                    per_backend.push((name, normalized));
                }
                Err(e) => {
                    warn!("Backend '{}' failed, skipping: {}", name, e);
                    backend_hit_counts.insert(name, 0);
                    last_failure = Some(e);
                }
            }
        }

        // Stable backend order keeps equal-score merges deterministic
        per_backend.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hits = merge_hits(per_backend);
        hits.truncate(top_k);

        if hits.is_empty() {
            // An outage on every backend is an outage, not an empty corpus
            if let Some(failure) = last_failure {
                if backend_hit_counts.values().all(|count| *count == 0) {
                    return Err(failure);
                }
            }
            return Err(DocsageError::EmptyIndex);
        }

        Ok(RetrievalResult {
            hits,
            backend_hit_counts,
        })
    }

    fn resolve_backends(&self, names: &[&str]) -> Result<Vec<Arc<dyn VectorIndex>>> {
        if names.is_empty() {
            let all = self.router.backends();
            if all.is_empty() {
                return Err(DocsageError::InvalidConfig(
                    "No index backend attached".to_string(),
                ));
            }
            let mut all = all;
            all.sort_by(|a, b| a.name().cmp(b.name()));
            return Ok(all);
        }

        names
            .iter()
            .map(|name| {
                self.router.backend(name).ok_or_else(|| {
                    DocsageError::InvalidConfig(format!("Unknown index backend '{}'", name))
                })
            })
            .collect()
    }

    async fn search_with_retry(
        &self,
        backend: &Arc<dyn VectorIndex>,
        vector: &[f32],
        fetch: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RawHit>> {
        let mut attempt: u32 = 0;

        loop {
            match backend.search(vector, fetch, filter).await {
                Ok(hits) => return Ok(hits),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    warn!(
                        "Backend '{}' search failed (attempt {}): {}",
                        backend.name(),
                        attempt + 1,
                        e
                    );
                    time::sleep(backoff::delay(self.config.retry_base(), attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into_crate_error(backend.name())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::document::ChunkId;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::index::IndexError;
    use crate::monitor::{Pressure, PressureLevel};
    use async_trait::async_trait;
    use std::result::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    struct ZeroProvider;

    impl EmbeddingProvider for ZeroProvider {
        fn embed_batch(
            &self,
            texts: &[String],
            _role: EmbedRole,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
        fn dimension(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "zero"
        }
    }

    /// Backend returning a scripted result set
    struct ScriptedBackend {
        name: String,
        hits: Vec<RawHit>,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(name: &str, hits: Vec<(u64, f32)>) -> Self {
            Self {
                name: name.to_string(),
                hits: hits
                    .into_iter()
                    .map(|(id, score)| RawHit {
                        chunk_id: ChunkId(id),
                        raw_score: score,
                    })
                    .collect(),
                fail_first: 0,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_first(mut self, n: usize) -> Self {
            self.fail_first = n;
            self
        }
    }

    #[async_trait]
    impl VectorIndex for ScriptedBackend {
        async fn upsert(
            &self,
            _chunk_id: ChunkId,
            _vector: &[f32],
            _metadata: &crate::index::EntryMetadata,
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn delete(&self, _chunk_id: ChunkId) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(
            &self,
            _query: &[f32],
            limit: usize,
            _filter: Option<&SearchFilter>,
        ) -> Result<Vec<RawHit>, IndexError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(IndexError::Unavailable("scripted outage".to_string()));
            }
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn count(&self) -> Result<u64, IndexError> {
            Ok(self.hits.len() as u64)
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn retriever_with(backends: Vec<Arc<dyn VectorIndex>>) -> Retriever {
        let (tx, rx) = watch::channel(Pressure::at_level(PressureLevel::Normal));
        Box::leak(Box::new(tx));

        let batcher = Arc::new(EmbeddingBatcher::new(
            Arc::new(ZeroProvider),
            rx,
            EmbeddingConfig {
                model: "zero".to_string(),
                dimension: 4,
                batch_size: 8,
                max_retries: 0,
                retry_base_ms: 1,
                timeout_secs: 5,
            },
        ));

        let router = Arc::new(IndexRouter::new(4));
        for backend in backends {
            router.attach(backend).unwrap();
        }

        Retriever::new(
            batcher,
            router,
            RetrievalConfig {
                fanout: 2,
                min_score: 0.0,
                max_retries: 1,
                retry_base_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_overlapping_backends_dedupe_to_best_score() {
        // Backend a ranks chunk 1 highest; backend b ranks chunk 2 highest.
        // After min-max normalization both top hits score 1.0 and the
        // duplicate ids collapse onto their best normalized score.
        let retriever = retriever_with(vec![
            Arc::new(ScriptedBackend::new("a", vec![(1, 0.9), (2, 0.5), (3, 0.1)])),
            Arc::new(ScriptedBackend::new("b", vec![(2, 12.0), (1, 6.0), (4, 3.0)])),
        ]);

        let result = retriever.retrieve("query", 3, &[], None).await.unwrap();

        assert_eq!(result.hits.len(), 3);
        // Chunks 1 and 2 both carry a normalized 1.0 from their best
        // backend; the tie breaks to the lowest chunk id
        assert_eq!(result.hits[0].chunk_id, ChunkId(1));
        assert_eq!(result.hits[1].chunk_id, ChunkId(2));
        assert_eq!(result.hits[0].score, 1.0);
        assert_eq!(result.hits[1].score, 1.0);
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let retriever = retriever_with(vec![Arc::new(ScriptedBackend::new(
            "a",
            vec![(1, 0.9), (2, 0.8), (3, 0.7), (4, 0.6), (5, 0.5)],
        ))]);

        let result = retriever.retrieve("query", 2, &[], None).await.unwrap();
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.backend_hit_counts["a"], 4); // top_k * fanout
    }

    #[tokio::test]
    async fn test_empty_backends_yield_empty_index() {
        let retriever = retriever_with(vec![Arc::new(ScriptedBackend::new("a", vec![]))]);

        let result = retriever.retrieve("query", 2, &[], None).await;
        assert!(matches!(result, Err(DocsageError::EmptyIndex)));
    }

    #[tokio::test]
    async fn test_transient_backend_failure_retried() {
        let backend = Arc::new(ScriptedBackend::new("a", vec![(1, 0.9)]).failing_first(1));
        let retriever = retriever_with(vec![backend.clone()]);

        let result = retriever.retrieve("query", 1, &[], None).await.unwrap();
        assert_eq!(result.hits[0].chunk_id, ChunkId(1));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_down_backend_skipped_when_other_answers() {
        let retriever = retriever_with(vec![
            Arc::new(ScriptedBackend::new("a", vec![(1, 0.9)])),
            Arc::new(ScriptedBackend::new("b", vec![(2, 0.9)]).failing_first(usize::MAX)),
        ]);

        let result = retriever.retrieve("query", 2, &[], None).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].chunk_id, ChunkId(1));
    }

    #[tokio::test]
    async fn test_all_backends_down_surfaces_unavailable() {
        let retriever = retriever_with(vec![Arc::new(
            ScriptedBackend::new("a", vec![(1, 0.9)]).failing_first(usize::MAX),
        )]);

        let result = retriever.retrieve("query", 1, &[], None).await;
        assert!(matches!(result, Err(DocsageError::IndexUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let retriever = retriever_with(vec![Arc::new(ScriptedBackend::new("a", vec![(1, 0.9)]))]);

        let result = retriever.retrieve("query", 1, &["nope"], None).await;
        assert!(matches!(result, Err(DocsageError::InvalidConfig(_))));
    }
}
