//! Language-model collaborator boundary and answer orchestration
//!
//! The language-model server is external; this module defines the trait it
//! is driven through, the transient/terminal error split its failures map
//! onto, and the cooperative cancellation token used by streaming
//! generation.

mod context;
mod orchestrator;

pub use context::{AssembledPrompt, ContextAssembler};
pub use orchestrator::{AnswerStream, Orchestrator};

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Transient transport failure (timeout, connection reset); retried
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The collaborator did not respond within the configured timeout
    #[error("Generation timed out")]
    TimedOut,

    /// The collaborator rejected the request; never retried
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Terminal model-side failure; never retried
    #[error("Model failure: {0}")]
    Model(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transport(_) | LlmError::TimedOut)
    }
}

/// Generation parameters forwarded to the collaborator
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// One request to the language-model collaborator
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Cooperative cancellation signal.
///
/// Cancellation is a flag checked between yields, never forceful task
/// termination. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for returns immediately when already cancelled
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for language-model collaborators.
///
/// Streaming contract: segments are sent in arrival order; the
/// implementation checks `cancel` between yields and, once it observes
/// cancellation, closes its transport and returns without sending further
/// segments. A send error on `segments` means the consumer is gone and is
/// treated the same as cancellation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single blocking generation
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Incremental generation; resolves when the stream ends
    async fn generate_stream(
        &self,
        request: &LlmRequest,
        segments: mpsc::Sender<String>,
        cancel: CancelToken,
    ) -> Result<(), LlmError>;

    fn model_name(&self) -> &str;
}
