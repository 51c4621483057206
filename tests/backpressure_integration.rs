//! Backpressure integration: the monitor's signal throttles the embedding
//! batcher and pauses ingestion intake.

use docsage::config::{EmbeddingConfig, MonitorConfig};
use docsage::document::{Chunker, PlainTextExtractor};
use docsage::embedding::{EmbedRole, EmbeddingBatcher, EmbeddingError, EmbeddingProvider};
use docsage::index::{FlatIndex, IndexRouter};
use docsage::monitor::{Pressure, PressureLevel, ResourceMonitor, ResourceSample, ResourceSampler};
use docsage::pipeline::IngestPipeline;
use docsage::storage::DocumentStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const DIM: usize = 4;

struct ConstProvider;

impl EmbeddingProvider for ConstProvider {
    fn embed_batch(
        &self,
        texts: &[String],
        _role: EmbedRole,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "const"
    }
}

/// Sampler pinned at a fixed memory ratio
struct PinnedSampler {
    used: u64,
}

impl ResourceSampler for PinnedSampler {
    fn sample(&self) -> ResourceSample {
        ResourceSample {
            memory_used_bytes: self.used,
            memory_limit_bytes: 100,
            cpu_load: 0.0,
        }
    }
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        sample_interval_ms: 10,
        elevated_threshold: 0.70,
        critical_threshold: 0.85,
        memory_limit_mb: 0,
    }
}

fn embedding_config(batch_size: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        model: "const".to_string(),
        dimension: DIM,
        batch_size,
        max_retries: 0,
        retry_base_ms: 1,
        timeout_secs: 5,
    }
}

async fn wait_for_level(rx: &mut watch::Receiver<Pressure>, level: PressureLevel) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while rx.borrow().level != level {
        tokio::select! {
            changed = rx.changed() => changed.unwrap(),
            _ = tokio::time::sleep_until(deadline) => panic!("monitor never reached {:?}", level),
        }
    }
}

#[tokio::test]
async fn test_monitor_signal_shrinks_batcher() {
    let monitor = ResourceMonitor::spawn(Arc::new(PinnedSampler { used: 95 }), monitor_config());
    let mut rx = monitor.subscribe();
    wait_for_level(&mut rx, PressureLevel::Critical).await;

    let critical_batcher =
        EmbeddingBatcher::new(Arc::new(ConstProvider), rx, embedding_config(32));

    let (normal_tx, normal_rx) = watch::channel(Pressure::at_level(PressureLevel::Normal));
    let normal_batcher =
        EmbeddingBatcher::new(Arc::new(ConstProvider), normal_rx, embedding_config(32));

    assert!(critical_batcher.effective_batch_size() < normal_batcher.effective_batch_size());
    assert!(critical_batcher.effective_batch_size() >= 1);

    drop(normal_tx);
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_critical_pressure_pauses_intake_until_relieved() {
    let (pressure_tx, pressure_rx) = watch::channel(Pressure::at_level(PressureLevel::Critical));

    let store = Arc::new(DocumentStore::in_memory().unwrap());
    let router = Arc::new(IndexRouter::new(DIM));
    router.attach(Arc::new(FlatIndex::in_memory(DIM).unwrap())).unwrap();

    let batcher = Arc::new(EmbeddingBatcher::new(
        Arc::new(ConstProvider),
        pressure_rx.clone(),
        embedding_config(8),
    ));

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(PlainTextExtractor),
        store,
        batcher,
        router,
        Chunker::new(10, 0).unwrap(),
        pressure_rx,
        2,
    ));

    let worker = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingest_bytes(Path::new("/docs/a.txt"), b"some words to ingest here")
                .await
        })
    };

    // Intake stays parked while pressure is critical
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!worker.is_finished());

    // Relieve pressure; the parked document proceeds
    pressure_tx
        .send(Pressure::at_level(PressureLevel::Normal))
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("ingestion should resume after pressure drops")
        .unwrap()
        .unwrap();

    assert_eq!(report.chunks_indexed, 1);
}
