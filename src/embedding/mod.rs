//! Embedding generation
//!
//! Architecture:
//! - `EmbeddingProvider` trait for abstraction over embedding backends
//! - `FastEmbedProvider` for local generation (all-MiniLM-L6-v2, 384-dim)
//! - `EmbeddingBatcher` for order-preserving, pressure-aware batch calls

mod batcher;
mod provider;

pub use batcher::EmbeddingBatcher;
pub use provider::{EmbedRole, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
