//! Docsage - Local Retrieval-Augmented Document Question Answering
//!
//! Turns raw documents into searchable vector indices and turns a user
//! query into a ranked, deduplicated context window handed to a locally
//! hosted language model. Ingestion and querying run concurrently under
//! cooperative memory backpressure.

pub mod backoff;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod monitor;
pub mod pipeline;
pub mod retrieval;
pub mod service;
pub mod storage;

pub use error::{DocsageError, Result};
