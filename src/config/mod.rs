//! Configuration management for docsage
//!
//! Loads and validates the pipeline configuration. Every tunable the
//! retrieval core depends on (chunk window, batch size, fanout, token
//! budget, pressure thresholds) lives here; nothing is hard-coded.

use crate::error::{DocsageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub monitor: MonitorConfig,
    pub pipeline: PipelineConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in estimated tokens (whitespace-separated words)
    pub max_tokens: usize,
    /// Overlap with the previous window, must be strictly below `max_tokens`
    pub overlap_tokens: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Process-wide vector dimension, enforced at index attach time
    pub dimension: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Index backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub qdrant_timeout_secs: u64,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Over-fetch multiplier applied to top_k per backend, must be >= 2
    pub fanout: usize,
    /// Normalized score floor; hits below it are dropped before merging
    pub min_score: f32,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl RetrievalConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

/// Language-model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Prompt context budget in estimated tokens
    pub context_token_budget: usize,
    pub system_prompt: String,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Resource monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub sample_interval_ms: u64,
    /// memory_used / memory_limit ratio above which pressure is Elevated
    pub elevated_threshold: f32,
    /// Ratio above which pressure is Critical
    pub critical_threshold: f32,
    /// 0 = autodetect from cgroup limit or total system memory
    pub memory_limit_mb: u64,
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bound on concurrently ingested documents
    pub max_workers: usize,
    pub channel_capacity: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocsageError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| DocsageError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| DocsageError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: DOCSAGE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("DOCSAGE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size = value.parse().map_err(|_| {
                    DocsageError::InvalidConfig(format!("Cannot parse '{}' as batch size", value))
                })?;
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "INDEX__QDRANT_URL" => {
                self.index.qdrant_url = value.to_string();
            }
            "CHUNKING__MAX_TOKENS" => {
                self.chunking.max_tokens = value.parse().map_err(|_| {
                    DocsageError::InvalidConfig(format!("Cannot parse '{}' as token count", value))
                })?;
            }
            "CHUNKING__OVERLAP_TOKENS" => {
                self.chunking.overlap_tokens = value.parse().map_err(|_| {
                    DocsageError::InvalidConfig(format!("Cannot parse '{}' as token count", value))
                })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DocsageError::InvalidConfig("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("docsage").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().ok_or_else(|| {
            DocsageError::InvalidConfig("Cannot determine home directory".to_string())
        })?;

        Ok(home_dir.join(".docsage"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.docsage"),
            },
            chunking: ChunkingConfig {
                max_tokens: 500,
                overlap_tokens: 50,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
                max_retries: 3,
                retry_base_ms: 200,
                timeout_secs: 30,
            },
            index: IndexConfig {
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 50,
                qdrant_url: "http://localhost:6334".to_string(),
                qdrant_collection: "docsage".to_string(),
                qdrant_timeout_secs: 10,
            },
            retrieval: RetrievalConfig {
                fanout: 2,
                min_score: 0.0,
                max_retries: 2,
                retry_base_ms: 100,
            },
            llm: LlmConfig {
                model: "mistral".to_string(),
                max_tokens: 512,
                temperature: 0.1,
                context_token_budget: 2000,
                system_prompt: "You are a document expert tutor. Answer clearly and concisely \
                                using the provided course materials."
                    .to_string(),
                max_retries: 3,
                retry_base_ms: 250,
                timeout_secs: 60,
            },
            monitor: MonitorConfig {
                sample_interval_ms: 500,
                elevated_threshold: 0.70,
                critical_threshold: 0.85,
                memory_limit_mb: 0,
            },
            pipeline: PipelineConfig {
                max_workers: 4,
                channel_capacity: 64,
            },
        }
    }
}
