/// Pressure-aware batch embedding with atomic call semantics
use super::{EmbedRole, EmbeddingError, EmbeddingProvider};
use crate::backoff;
use crate::config::EmbeddingConfig;
use crate::monitor::{Pressure, PressureLevel};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, warn};

/// Groups texts into bounded batches for the embedding collaborator.
///
/// Output is order-preserving: vector i always belongs to input text i,
/// because downstream code zips embeddings onto chunks by position. The
/// whole call either returns every vector or fails; partial results never
/// escape. Under memory pressure the next batch shrinks before it is
/// issued, never below a single item.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    pressure: watch::Receiver<Pressure>,
    config: EmbeddingConfig,
}

impl EmbeddingBatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        pressure: watch::Receiver<Pressure>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            pressure,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Batch size for the next batch, derated by current memory pressure
    pub fn effective_batch_size(&self) -> usize {
        let configured = self.config.batch_size;
        match self.pressure.borrow().level {
            PressureLevel::Normal => configured,
            PressureLevel::Elevated => (configured / 2).max(1),
            PressureLevel::Critical => (configured / 4).max(1),
        }
    }

    /// Embed all texts, preserving input order.
    pub async fn embed(
        &self,
        texts: &[String],
        role: EmbedRole,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        let mut index = 0;

        while index < texts.len() {
            // Re-read pressure before every batch so backpressure takes
            // effect mid-call instead of only at call boundaries
            let size = self.effective_batch_size();
            let end = (index + size).min(texts.len());
            let batch = texts[index..end].to_vec();

            debug!("Embedding batch of {} ({} of {})", batch.len(), end, texts.len());

            let batch_vectors = self.embed_with_retry(batch, role).await?;
            vectors.extend(batch_vectors);
            index = end;
        }

        Ok(vectors)
    }

    async fn embed_with_retry(
        &self,
        batch: Vec<String>,
        role: EmbedRole,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt: u32 = 0;

        loop {
            match self.call_provider(batch.clone(), role).await {
                Ok(vectors) if vectors.len() == batch.len() => return Ok(vectors),
                Ok(vectors) => {
                    let err = EmbeddingError::GenerationError(format!(
                        "Embedding count mismatch: expected {}, got {}",
                        batch.len(),
                        vectors.len()
                    ));
                    if attempt >= self.config.max_retries {
                        return Err(EmbeddingError::Unavailable(err.to_string()));
                    }
                    warn!("Embedding batch failed (attempt {}): {}", attempt + 1, err);
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.max_retries {
                        return Err(EmbeddingError::Unavailable(e.to_string()));
                    }
                    warn!("Embedding batch failed (attempt {}): {}", attempt + 1, e);
                }
                Err(e) => return Err(e),
            }

            time::sleep(backoff::delay(self.config.retry_base(), attempt)).await;
            attempt += 1;
        }
    }

    async fn call_provider(
        &self,
        batch: Vec<String>,
        role: EmbedRole,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = self.provider.clone();
        let handle = tokio::task::spawn_blocking(move || provider.embed_batch(&batch, role));

        match time::timeout(self.config.timeout(), handle).await {
            Err(_) => Err(EmbeddingError::TimedOut),
            Ok(Err(join_err)) => Err(EmbeddingError::GenerationError(format!(
                "Embedding task panicked: {}",
                join_err
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub provider encoding the input's marker index into its vector
    struct MarkerProvider {
        dimension: usize,
        calls: AtomicUsize,
        fail_first: usize,
        max_seen_batch: AtomicUsize,
    }

    impl MarkerProvider {
        fn new(dimension: usize, fail_first: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail_first,
                max_seen_batch: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for MarkerProvider {
        fn embed_batch(
            &self,
            texts: &[String],
            _role: EmbedRole,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_seen_batch.fetch_max(texts.len(), Ordering::SeqCst);

            if call < self.fail_first {
                return Err(EmbeddingError::GenerationError("flaky".to_string()));
            }

            Ok(texts
                .iter()
                .map(|t| {
                    let marker: f32 = t.trim_start_matches("marker-").parse().unwrap();
                    let mut v = vec![0.0; self.dimension];
                    v[0] = marker;
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "marker"
        }
    }

    fn config(batch_size: usize, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            model: "marker".to_string(),
            dimension: 4,
            batch_size,
            max_retries,
            retry_base_ms: 1,
            timeout_secs: 5,
        }
    }

    fn pressure_channel(level: PressureLevel) -> watch::Receiver<Pressure> {
        let (tx, rx) = watch::channel(Pressure::at_level(level));
        // keep the sender alive for the duration of the test
        Box::leak(Box::new(tx));
        rx
    }

    fn markers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("marker-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_across_batches() {
        let provider = Arc::new(MarkerProvider::new(4, 0));
        let batcher = EmbeddingBatcher::new(provider, pressure_channel(PressureLevel::Normal), config(3, 0));

        let vectors = batcher.embed(&markers(10), EmbedRole::Document).await.unwrap();

        assert_eq!(vectors.len(), 10);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
    }

    #[tokio::test]
    async fn test_critical_pressure_shrinks_batches() {
        let normal = EmbeddingBatcher::new(
            Arc::new(MarkerProvider::new(4, 0)),
            pressure_channel(PressureLevel::Normal),
            config(32, 0),
        );
        let critical_provider = Arc::new(MarkerProvider::new(4, 0));
        let critical = EmbeddingBatcher::new(
            critical_provider.clone(),
            pressure_channel(PressureLevel::Critical),
            config(32, 0),
        );

        assert!(critical.effective_batch_size() < normal.effective_batch_size());
        assert!(critical.effective_batch_size() >= 1);

        critical.embed(&markers(20), EmbedRole::Document).await.unwrap();
        assert!(critical_provider.max_seen_batch.load(Ordering::SeqCst) <= 8);
    }

    #[tokio::test]
    async fn test_shrink_never_below_one() {
        let batcher = EmbeddingBatcher::new(
            Arc::new(MarkerProvider::new(4, 0)),
            pressure_channel(PressureLevel::Critical),
            config(1, 0),
        );

        assert_eq!(batcher.effective_batch_size(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let provider = Arc::new(MarkerProvider::new(4, 2));
        let batcher = EmbeddingBatcher::new(
            provider.clone(),
            pressure_channel(PressureLevel::Normal),
            config(8, 3),
        );

        let vectors = batcher.embed(&markers(4), EmbedRole::Document).await.unwrap();
        assert_eq!(vectors.len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unavailable() {
        let provider = Arc::new(MarkerProvider::new(4, usize::MAX));
        let batcher = EmbeddingBatcher::new(provider, pressure_channel(PressureLevel::Normal), config(8, 2));

        let result = batcher.embed(&markers(4), EmbedRole::Document).await;
        assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_not_retried() {
        struct RejectingProvider;
        impl EmbeddingProvider for RejectingProvider {
            fn embed_batch(
                &self,
                _texts: &[String],
                _role: EmbedRole,
            ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::InvalidInput("empty".to_string()))
            }
            fn dimension(&self) -> usize {
                4
            }
            fn model_name(&self) -> &str {
                "rejecting"
            }
        }

        let batcher = EmbeddingBatcher::new(
            Arc::new(RejectingProvider),
            pressure_channel(PressureLevel::Normal),
            config(8, 5),
        );

        let result = batcher.embed(&markers(2), EmbedRole::Document).await;
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
    }
}
