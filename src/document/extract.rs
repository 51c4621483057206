//! Document-extraction collaborator boundary
//!
//! An extractor turns raw file bytes into ordered page texts. A page that
//! fails extraction is reported in place, never failing the whole document.

use super::Page;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No text could be extracted from any page")]
    EmptyDocument,

    #[error("Extractor process failed: {0}")]
    ProcessError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Trait for document extractors
pub trait DocumentExtractor: Send + Sync {
    /// Extract ordered pages from raw file bytes. Individual pages may be
    /// marked failed; the call only errors when nothing is usable.
    fn extract(&self, data: &[u8]) -> Result<Vec<Page>, ExtractError>;

    fn name(&self) -> &str;
}

/// Extractor for plain UTF-8 text. Pages split on form feed, matching the
/// page separator `pdftotext` emits.
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, data: &[u8]) -> Result<Vec<Page>, ExtractError> {
        let text = String::from_utf8_lossy(data);

        let pages: Vec<Page> = text
            .split('\u{c}')
            .enumerate()
            .filter(|(_, page_text)| !page_text.trim().is_empty())
            .map(|(index, page_text)| Page::text(index, page_text.trim()))
            .collect();

        if pages.is_empty() {
            return Err(ExtractError::EmptyDocument);
        }

        Ok(pages)
    }

    fn name(&self) -> &str {
        "plain-text"
    }
}

/// Extractor that shells out to the `pdftotext` binary (poppler).
///
/// Page boundaries are form feeds in the tool's output. A page with no
/// extractable text is recorded as failed rather than silently dropped, so
/// page indices stay aligned with the source document.
pub struct PdftotextExtractor;

impl DocumentExtractor for PdftotextExtractor {
    fn extract(&self, data: &[u8]) -> Result<Vec<Page>, ExtractError> {
        use std::process::Command;

        let temp_dir = std::env::temp_dir();
        let temp_file = temp_dir.join(format!("docsage_{}.pdf", std::process::id()));

        std::fs::write(&temp_file, data)?;

        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(&temp_file)
            .arg("-")
            .output();
        let _ = std::fs::remove_file(&temp_file);

        let output = output.map_err(|e| {
            ExtractError::ProcessError(format!("pdftotext failed: {} (is poppler installed?)", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::ProcessError(format!(
                "pdftotext exited with {}: {}",
                output.status, stderr
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);

        let mut pages = Vec::new();
        let mut usable = 0usize;
        for (index, page_text) in text.split('\u{c}').enumerate() {
            let trimmed = page_text.trim();
            if trimmed.is_empty() {
                pages.push(Page::failed(index, "no extractable text"));
            } else {
                pages.push(Page::text(index, trimmed));
                usable += 1;
            }
        }

        // Trailing form feed produces one empty tail entry, not a real page
        if let Some(last) = pages.last() {
            if last.is_failed() && last.index + 1 == pages.len() {
                pages.pop();
            }
        }

        if usable == 0 {
            return Err(ExtractError::EmptyDocument);
        }

        tracing::debug!("pdftotext extracted {} pages ({} usable)", pages.len(), usable);

        Ok(pages)
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}
