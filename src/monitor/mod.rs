//! Resource monitor: periodic memory/CPU sampling and backpressure signal
//!
//! The monitor runs on its own timer, never on a request path. Consumers
//! (embedding batcher, ingestion pipeline) hold a cheap watch receiver and
//! read the latest pressure level whenever they are about to take on work.

use crate::config::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time;

/// One sampled reading from the resource collaborator
#[derive(Debug, Clone, Default)]
pub struct ResourceSample {
    pub memory_used_bytes: u64,
    /// 0 when the limit is unknown; pressure then reads as Normal
    pub memory_limit_bytes: u64,
    pub cpu_load: f32,
}

/// Derived pressure level consumed by upstream throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureLevel {
    Normal,
    Elevated,
    Critical,
}

/// Latest sample plus its derived level, published on a watch channel
#[derive(Debug, Clone)]
pub struct Pressure {
    pub level: PressureLevel,
    pub sample: ResourceSample,
}

impl Pressure {
    /// Starting value before the first sampling tick
    pub fn idle() -> Self {
        Self {
            level: PressureLevel::Normal,
            sample: ResourceSample::default(),
        }
    }

    pub fn at_level(level: PressureLevel) -> Self {
        Self {
            level,
            sample: ResourceSample::default(),
        }
    }
}

/// Collaborator boundary for OS metric collection
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Derive a pressure level from a sample and the configured thresholds
pub fn derive_level(sample: &ResourceSample, config: &MonitorConfig) -> PressureLevel {
    if sample.memory_limit_bytes == 0 {
        return PressureLevel::Normal;
    }

    let ratio = sample.memory_used_bytes as f64 / sample.memory_limit_bytes as f64;
    if ratio >= config.critical_threshold as f64 {
        PressureLevel::Critical
    } else if ratio >= config.elevated_threshold as f64 {
        PressureLevel::Elevated
    } else {
        PressureLevel::Normal
    }
}

/// Background monitor task handle
pub struct ResourceMonitor {
    tx: watch::Sender<Pressure>,
    task: tokio::task::JoinHandle<()>,
}

impl ResourceMonitor {
    /// Spawn the sampling task. The returned monitor owns the task; clones
    /// of the receiver are handed to every consumer that throttles on it.
    pub fn spawn(sampler: Arc<dyn ResourceSampler>, config: MonitorConfig) -> Self {
        let (tx, _rx) = watch::channel(Pressure::idle());
        let task_tx = tx.clone();
        let interval = config.sample_interval();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let sample = sampler.sample();
                let level = derive_level(&sample, &config);

                let previous = task_tx.borrow().level;
                if previous != level {
                    tracing::info!(
                        "Resource pressure {:?} -> {:?} ({} / {} bytes)",
                        previous,
                        level,
                        sample.memory_used_bytes,
                        sample.memory_limit_bytes
                    );
                }

                if task_tx.send(Pressure { level, sample }).is_err() {
                    break; // all receivers gone
                }
            }
        });

        Self { tx, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Pressure> {
        self.tx.subscribe()
    }

    /// Stop the sampling task
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Default Linux sampler reading procfs; stands in for the OS collaborator.
///
/// Limit resolution order: configured override, cgroup v2 `memory.max`,
/// then total system memory. An unresolvable limit is reported as 0.
pub struct ProcSampler {
    memory_limit_bytes: u64,
}

impl ProcSampler {
    pub fn new(config: &MonitorConfig) -> Self {
        let memory_limit_bytes = if config.memory_limit_mb > 0 {
            config.memory_limit_mb * 1024 * 1024
        } else {
            detect_memory_limit().unwrap_or(0)
        };

        Self { memory_limit_bytes }
    }
}

impl ResourceSampler for ProcSampler {
    fn sample(&self) -> ResourceSample {
        ResourceSample {
            memory_used_bytes: read_process_rss().unwrap_or(0),
            memory_limit_bytes: self.memory_limit_bytes,
            cpu_load: read_load_average().unwrap_or(0.0),
        }
    }
}

fn read_process_rss() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

fn detect_memory_limit() -> Option<u64> {
    // cgroup v2 limit, if this process runs inside one
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/memory.max") {
        if let Ok(bytes) = max.trim().parse::<u64>() {
            return Some(bytes);
        }
    }

    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

fn read_load_average() -> Option<f32> {
    let loadavg = std::fs::read_to_string("/proc/loadavg").ok()?;
    loadavg.split_whitespace().next()?.parse().ok()
}
