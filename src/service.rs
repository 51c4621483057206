//! End-to-end query path: retrieve, hydrate, assemble, answer
//!
//! A query always resolves to an answer, a structured failure, or a
//! degraded answer produced without retrieved context when retrieval
//! yields nothing.

use crate::document::Chunk;
use crate::error::{DocsageError, Result};
use crate::index::SearchFilter;
use crate::llm::{AnswerStream, ContextAssembler, GenerationParams, Orchestrator};
use crate::retrieval::{RetrievalResult, Retriever};
use crate::storage::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Whether retrieved context backed the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    WithContext,
    /// Retrieval found nothing; the model answered from the question alone
    WithoutContext,
}

/// Final answer for one query
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub mode: ContextMode,
    /// Chunk ids whose text entered the prompt, in rank order
    pub context_chunks: Vec<crate::document::ChunkId>,
}

/// Query service wiring the read path together
pub struct QueryService {
    retriever: Arc<Retriever>,
    store: Arc<DocumentStore>,
    orchestrator: Arc<Orchestrator>,
    assembler: ContextAssembler,
}

impl QueryService {
    pub fn new(
        retriever: Arc<Retriever>,
        store: Arc<DocumentStore>,
        orchestrator: Arc<Orchestrator>,
        assembler: ContextAssembler,
    ) -> Self {
        Self {
            retriever,
            store,
            orchestrator,
            assembler,
        }
    }

    /// Answer a question with retrieved context, falling back to a
    /// context-free answer when the indices are empty.
    pub async fn ask(
        &self,
        question: &str,
        top_k: usize,
        backends: &[&str],
        filter: Option<&SearchFilter>,
        params: Option<GenerationParams>,
    ) -> Result<Answer> {
        let params = params.unwrap_or_else(|| self.orchestrator.default_params());

        let assembled = match self.retriever.retrieve(question, top_k, backends, filter).await {
            Ok(retrieval) => {
                let chunks = self.hydrate(&retrieval)?;
                self.assembler.assemble(question, &chunks)
            }
            Err(DocsageError::EmptyIndex) => {
                warn!("Retrieval returned nothing; answering without context");
                self.assembler.assemble_without_context(question)
            }
            Err(e) => return Err(e),
        };

        let mode = if assembled.included.is_empty() {
            ContextMode::WithoutContext
        } else {
            ContextMode::WithContext
        };

        let text = self.orchestrator.answer(&assembled.prompt, &params).await?;

        Ok(Answer {
            text,
            mode,
            context_chunks: assembled.included,
        })
    }

    /// Streaming variant of [`ask`](Self::ask)
    pub async fn ask_stream(
        &self,
        question: &str,
        top_k: usize,
        backends: &[&str],
        filter: Option<&SearchFilter>,
        params: Option<GenerationParams>,
    ) -> Result<(AnswerStream, ContextMode)> {
        let params = params.unwrap_or_else(|| self.orchestrator.default_params());

        let assembled = match self.retriever.retrieve(question, top_k, backends, filter).await {
            Ok(retrieval) => {
                let chunks = self.hydrate(&retrieval)?;
                self.assembler.assemble(question, &chunks)
            }
            Err(DocsageError::EmptyIndex) => {
                warn!("Retrieval returned nothing; streaming without context");
                self.assembler.assemble_without_context(question)
            }
            Err(e) => return Err(e),
        };

        let mode = if assembled.included.is_empty() {
            ContextMode::WithoutContext
        } else {
            ContextMode::WithContext
        };

        let stream = self
            .orchestrator
            .answer_stream(&assembled.prompt, &params)
            .await?;

        Ok((stream, mode))
    }

    /// Resolve hit ids back to chunk text, preserving rank order. Ids that
    /// no longer resolve (index entries outliving their chunks) are dropped
    /// with a warning rather than failing the query.
    fn hydrate(&self, retrieval: &RetrievalResult) -> Result<Vec<Chunk>> {
        let ids = retrieval.chunk_ids();
        let chunks = self.store.get_chunks(&ids)?;

        if chunks.len() < ids.len() {
            warn!(
                "{} of {} retrieved chunk ids no longer resolve; reconciling",
                ids.len() - chunks.len(),
                ids.len()
            );
        }

        // Reorder to match the ranked hit order
        let mut by_id: HashMap<_, _> = chunks.into_iter().map(|c| (c.id, c)).collect();
        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = by_id.remove(&id) {
                ordered.push(chunk);
            }
        }

        Ok(ordered)
    }
}
