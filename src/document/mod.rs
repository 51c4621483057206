//! Document model: content-addressed documents, pages, and chunks
//!
//! Identifiers are derived from content so re-ingesting identical input
//! produces identical ids everywhere downstream (idempotent upsert).

mod chunker;
mod extract;

pub use chunker::{ChunkIter, Chunker};
pub use extract::{DocumentExtractor, ExtractError, PdftotextExtractor, PlainTextExtractor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Content-addressed document identifier (blake3 of the full page text)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId([u8; 32]);

impl DocumentId {
    pub fn from_pages(pages: &[Page]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for page in pages {
            hasher.update(&(page.index as u64).to_be_bytes());
            hasher.update(page.text.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Deterministic chunk identifier shared across every index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl ChunkId {
    /// Derive from the owning document and the chunk's character span.
    pub fn derive(document_id: &DocumentId, start_offset: usize, end_offset: usize) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(document_id.as_bytes());
        hasher.update(&(start_offset as u64).to_be_bytes());
        hasher.update(&(end_offset as u64).to_be_bytes());
        let hash = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    /// Bit-cast for sqlite storage (INTEGER is i64).
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single extracted page. A failed page keeps its slot with empty text
/// and the recorded reason so ingestion can continue around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub text: String,
    pub error: Option<String>,
}

impl Page {
    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            text: String::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// An ingested document. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_path: PathBuf,
    pub pages: Vec<Page>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_path: PathBuf, pages: Vec<Page>) -> Self {
        let id = DocumentId::from_pages(&pages);
        Self {
            id,
            source_path,
            pages,
            ingested_at: Utc::now(),
        }
    }

    /// Concatenated text of the successfully extracted pages.
    pub fn full_text(&self) -> String {
        let mut text = String::new();
        for page in &self.pages {
            if page.is_failed() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&page.text);
        }
        text
    }

    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.is_failed())
            .map(|p| p.index)
            .collect()
    }
}

/// A bounded span of document text, the unit of embedding and retrieval.
/// Never mutated after creation; superseded chunks are deleted, not edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_count: usize,
    pub overlaps_previous: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_content_addressed() {
        let pages = vec![Page::text(0, "alpha"), Page::text(1, "beta")];
        let a = Document::new(PathBuf::from("/tmp/a.pdf"), pages.clone());
        let b = Document::new(PathBuf::from("/tmp/b.pdf"), pages);

        // Same content, different source path: same identity
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_document_id_changes_with_content() {
        let a = Document::new(PathBuf::from("/x"), vec![Page::text(0, "alpha")]);
        let b = Document::new(PathBuf::from("/x"), vec![Page::text(0, "alpha!")]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_chunk_id_deterministic() {
        let doc = DocumentId::from_pages(&[Page::text(0, "hello world")]);
        let a = ChunkId::derive(&doc, 0, 11);
        let b = ChunkId::derive(&doc, 0, 11);
        let c = ChunkId::derive(&doc, 1, 11);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chunk_id_i64_roundtrip() {
        let id = ChunkId(u64::MAX - 7);
        assert_eq!(ChunkId::from_i64(id.as_i64()), id);
    }

    #[test]
    fn test_full_text_skips_failed_pages() {
        let doc = Document::new(
            PathBuf::from("/x"),
            vec![
                Page::text(0, "one"),
                Page::failed(1, "extraction error"),
                Page::text(2, "three"),
            ],
        );

        assert_eq!(doc.full_text(), "one\nthree");
        assert_eq!(doc.failed_pages(), vec![1]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = DocumentId::from_pages(&[Page::text(0, "roundtrip")]);
        let hex = id.to_hex();
        assert_eq!(DocumentId::from_hex(&hex), Some(id));
        assert_eq!(DocumentId::from_hex("zz"), None);
    }
}
