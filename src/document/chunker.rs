//! Overlapping-window chunker
//!
//! Splits a document's text into windows of at most `max_tokens` estimated
//! tokens, each overlapping the previous by `overlap_tokens` to preserve
//! context across boundaries. Tokens are estimated as whitespace-separated
//! words; the chunker and the context assembler share this estimate so
//! budgets compose.

use super::{Chunk, ChunkId, Document, DocumentId};
use crate::error::{DocsageError, Result};

/// Window chunker. Produces a lazy, finite, restartable iterator per
/// document so large documents never hold their full chunk set in memory.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(DocsageError::InvalidConfig(
                "Chunk window size must be greater than 0".to_string(),
            ));
        }
        if overlap_tokens >= max_tokens {
            return Err(DocsageError::InvalidConfig(format!(
                "Chunk overlap ({}) must be strictly below the window size ({})",
                overlap_tokens, max_tokens
            )));
        }

        Ok(Self {
            max_tokens,
            overlap_tokens,
        })
    }

    /// Split a document into overlapping chunks. Produces no side effects
    /// and never writes to any index.
    pub fn chunk(&self, document: &Document) -> ChunkIter {
        ChunkIter::new(
            document.id.clone(),
            document.full_text(),
            self.max_tokens,
            self.overlap_tokens,
        )
    }
}

/// Lazy chunk iterator over one document's text
pub struct ChunkIter {
    document_id: DocumentId,
    text: String,
    /// (start, end) character offsets of each word in `text`
    word_spans: Vec<(usize, usize)>,
    cursor: usize,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl ChunkIter {
    fn new(document_id: DocumentId, text: String, max_tokens: usize, overlap_tokens: usize) -> Self {
        let word_spans = word_spans(&text);
        Self {
            document_id,
            text,
            word_spans,
            cursor: 0,
            max_tokens,
            overlap_tokens,
        }
    }
}

impl Iterator for ChunkIter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.cursor >= self.word_spans.len() {
            return None;
        }

        let window_end = (self.cursor + self.max_tokens).min(self.word_spans.len());
        let start_offset = self.word_spans[self.cursor].0;
        let end_offset = self.word_spans[window_end - 1].1;
        let token_count = window_end - self.cursor;

        let chunk = Chunk {
            id: ChunkId::derive(&self.document_id, start_offset, end_offset),
            document_id: self.document_id.clone(),
            text: self.text[start_offset..end_offset].to_string(),
            start_offset,
            end_offset,
            token_count,
            overlaps_previous: self.cursor > 0 && self.overlap_tokens > 0,
        };

        if window_end == self.word_spans.len() {
            // Final window; a shorter overlap tail would be fully contained in it
            self.cursor = self.word_spans.len();
        } else {
            self.cursor += self.max_tokens - self.overlap_tokens;
        }

        Some(chunk)
    }
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}
