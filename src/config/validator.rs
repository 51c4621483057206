use crate::config::Config;
use crate::error::{DocsageError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_monitor(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocsageError::ConfigValidation { errors })
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.max_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.max_tokens",
                "Window size must be greater than 0",
            ));
        }

        if config.chunking.overlap_tokens >= config.chunking.max_tokens {
            errors.push(ValidationError::new(
                "chunking.overlap_tokens",
                format!(
                    "Overlap ({}) must be strictly below the window size ({})",
                    config.chunking.overlap_tokens, config.chunking.max_tokens
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M parameter must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if config.index.qdrant_collection.is_empty() {
            errors.push(ValidationError::new(
                "index.qdrant_collection",
                "Collection name cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.fanout < 2 {
            errors.push(ValidationError::new(
                "retrieval.fanout",
                format!(
                    "Fanout must be at least 2 to tolerate cross-backend duplicates, got {}",
                    config.retrieval.fanout
                ),
            ));
        }

        if !(0.0..=1.0).contains(&config.retrieval.min_score) {
            errors.push(ValidationError::new(
                "retrieval.min_score",
                "Score floor must be within [0, 1]",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        if config.llm.context_token_budget == 0 {
            errors.push(ValidationError::new(
                "llm.context_token_budget",
                "Context budget must be greater than 0",
            ));
        }

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be within [0, 2], got {}", config.llm.temperature),
            ));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_monitor(config: &Config, errors: &mut Vec<ValidationError>) {
        let elevated = config.monitor.elevated_threshold;
        let critical = config.monitor.critical_threshold;

        if !(0.0..=1.0).contains(&elevated) || elevated == 0.0 {
            errors.push(ValidationError::new(
                "monitor.elevated_threshold",
                "Threshold must be within (0, 1]",
            ));
        }

        if !(0.0..=1.0).contains(&critical) || critical == 0.0 {
            errors.push(ValidationError::new(
                "monitor.critical_threshold",
                "Threshold must be within (0, 1]",
            ));
        }

        if elevated >= critical {
            errors.push(ValidationError::new(
                "monitor.critical_threshold",
                format!(
                    "Critical threshold ({}) must be above the elevated threshold ({})",
                    critical, elevated
                ),
            ));
        }

        if config.monitor.sample_interval_ms == 0 {
            errors.push(ValidationError::new(
                "monitor.sample_interval_ms",
                "Sample interval must be greater than 0",
            ));
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.max_workers == 0 {
            errors.push(ValidationError::new(
                "pipeline.max_workers",
                "Worker count must be greater than 0",
            ));
        }

        if config.pipeline.channel_capacity == 0 {
            errors.push(ValidationError::new(
                "pipeline.channel_capacity",
                "Channel capacity must be greater than 0",
            ));
        }
    }
}
