use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the docsage pipeline
#[derive(Error, Debug)]
pub enum DocsageError {
    /// Bad caller-supplied parameters (chunking, fanout, generation). Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Embedding collaborator exhausted its retries
    #[error("Embedding collaborator unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Index backend unreachable after retries
    #[error("Index backend '{backend}' unavailable: {reason}")]
    IndexUnavailable { backend: String, reason: String },

    /// Persisted index state unreadable; requires operator intervention
    #[error("Index backend '{backend}' corrupt: {reason}")]
    IndexCorrupt { backend: String, reason: String },

    /// No backend returned any result for a query
    #[error("No index backend returned any result")]
    EmptyIndex,

    /// Terminal language-model failure, surfaced as the query's final failure
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DocsageError {
    /// Whether retrying the whole operation can be expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocsageError::EmbeddingUnavailable(_) | DocsageError::IndexUnavailable { .. }
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for docsage operations
pub type Result<T> = std::result::Result<T, DocsageError>;
