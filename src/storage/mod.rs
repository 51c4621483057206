//! SQLite document/chunk store with migrations
//!
//! Append-and-idempotent-upsert only: documents are immutable once stored,
//! chunks are replaced wholesale when their source content changes, and no
//! caller ever needs to resolve a read-modify-write race.

use crate::document::{Chunk, ChunkId, Document, DocumentId};
use crate::error::{DocsageError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Outcome of an idempotent document insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New content stored
    Inserted,
    /// Identical content already present; nothing changed
    Duplicate,
    /// The source path previously mapped to different content, which was
    /// removed. Carries the superseded chunk ids so index backends can purge.
    Superseded { old_chunks: Vec<ChunkId> },
}

/// Document store backed by sqlite
pub struct DocumentStore {
    pool: DbPool,
}

impl DocumentStore {
    /// Open (or create) the store at the given path
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocsageError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // WAL for concurrent readers during ingestion; pragmas are
        // per-connection, so they run for every pooled connection
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(16).build(manager).map_err(|e| {
            DocsageError::InvalidConfig(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store.migrate()?;

        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            DocsageError::InvalidConfig(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| DocsageError::InvalidConfig(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Idempotent document insert keyed by content hash.
    ///
    /// Identical content is a no-op. A source path re-ingested with changed
    /// content supersedes its previous document; the removed chunk ids are
    /// returned so every index backend can delete them.
    pub fn insert_document(&self, document: &Document) -> Result<InsertOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let doc_hex = document.id.to_hex();
        let source = document.source_path.to_string_lossy().to_string();

        let exists = tx
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![doc_hex],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        if exists {
            tx.commit()?;
            return Ok(InsertOutcome::Duplicate);
        }

        // Supersede any prior document ingested from the same source path
        let previous: Option<String> = tx
            .query_row(
                "SELECT document_id FROM sources WHERE source_path = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;

        let mut old_chunks = Vec::new();
        if let Some(old_id) = &previous {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
            let ids = stmt.query_map(params![old_id], |row| row.get::<_, i64>(0))?;
            for id in ids {
                old_chunks.push(ChunkId::from_i64(id?));
            }
            drop(stmt);

            tx.execute("DELETE FROM documents WHERE id = ?1", params![old_id])?;
        }

        tx.execute(
            "INSERT INTO documents (id, source_path, ingested_at, page_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                doc_hex,
                source,
                document.ingested_at.timestamp(),
                document.pages.len() as i64,
            ],
        )?;

        for page in &document.pages {
            tx.execute(
                "INSERT INTO pages (document_id, page_index, text, error)
                 VALUES (?1, ?2, ?3, ?4)",
                params![doc_hex, page.index as i64, page.text, page.error],
            )?;
        }

        tx.execute(
            "INSERT INTO sources (source_path, document_id) VALUES (?1, ?2)
             ON CONFLICT(source_path) DO UPDATE SET document_id = excluded.document_id",
            params![source, doc_hex],
        )?;

        tx.commit()?;

        if previous.is_some() {
            Ok(InsertOutcome::Superseded { old_chunks })
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    /// Replace a document's chunk set atomically
    pub fn replace_chunks(&self, document_id: &DocumentId, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let doc_hex = document_id.to_hex();

        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_hex])?;

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks
                     (id, document_id, start_offset, end_offset, token_count,
                      overlaps_previous, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chunk.id.as_i64(),
                    doc_hex,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    chunk.token_count as i64,
                    chunk.overlaps_previous,
                    chunk.text,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch chunks by id. Ids that no longer resolve are skipped; the
    /// caller decides whether missing entries are worth a warning.
    pub fn get_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut out = Vec::with_capacity(ids.len());

        let mut stmt = conn.prepare(
            "SELECT id, document_id, start_offset, end_offset, token_count,
                    overlaps_previous, text
             FROM chunks WHERE id = ?1",
        )?;

        for id in ids {
            let row = stmt
                .query_row(params![id.as_i64()], |row| {
                    let doc_hex: String = row.get(1)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        doc_hex,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .optional()?;

            if let Some((id, doc_hex, start, end, tokens, overlaps, text)) = row {
                let document_id = match DocumentId::from_hex(&doc_hex) {
                    Some(d) => d,
                    None => {
                        tracing::warn!("Skipping chunk {} with malformed document id", id);
                        continue;
                    }
                };
                out.push(Chunk {
                    id: ChunkId::from_i64(id),
                    document_id,
                    text,
                    start_offset: start as usize,
                    end_offset: end as usize,
                    token_count: tokens as usize,
                    overlaps_previous: overlaps,
                });
            }
        }

        Ok(out)
    }

    pub fn chunk_ids_for_document(&self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM chunks WHERE document_id = ?1 ORDER BY start_offset")?;
        let rows = stmt.query_map(params![document_id.to_hex()], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(ChunkId::from_i64(id?));
        }
        Ok(ids)
    }

    pub fn document_exists(&self, document_id: &DocumentId) -> Result<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE id = ?1",
            params![document_id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn chunk_count(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let page_count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        let failed_page_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE error IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        Ok(StoreStats {
            document_count: document_count as u64,
            page_count: page_count as u64,
            failed_page_count: failed_page_count as u64,
            chunk_count: chunk_count as u64,
        })
    }
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub document_count: u64,
    pub page_count: u64,
    pub failed_page_count: u64,
    pub chunk_count: u64,
}

const MIGRATIONS: &[&str] = &["
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        source_path TEXT NOT NULL,
        ingested_at INTEGER NOT NULL,
        page_count INTEGER NOT NULL
    );

    CREATE TABLE pages (
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        page_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        error TEXT,
        PRIMARY KEY (document_id, page_index)
    );

    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        token_count INTEGER NOT NULL,
        overlaps_previous INTEGER NOT NULL,
        text TEXT NOT NULL
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);

    CREATE TABLE sources (
        source_path TEXT PRIMARY KEY,
        document_id TEXT NOT NULL
    );
"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;
    use std::path::PathBuf;

    fn sample_document() -> Document {
        Document::new(
            PathBuf::from("/docs/sample.pdf"),
            vec![Page::text(0, "alpha beta gamma"), Page::text(1, "delta")],
        )
    }

    fn sample_chunk(document: &Document, start: usize, end: usize, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::derive(&document.id, start, end),
            document_id: document.id.clone(),
            text: text.to_string(),
            start_offset: start,
            end_offset: end,
            token_count: text.split_whitespace().count(),
            overlaps_previous: false,
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = DocumentStore::in_memory().unwrap();
        let doc = sample_document();

        assert_eq!(store.insert_document(&doc).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_document(&doc).unwrap(), InsertOutcome::Duplicate);

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.page_count, 2);
    }

    #[test]
    fn test_changed_content_supersedes_source() {
        let store = DocumentStore::in_memory().unwrap();
        let old = sample_document();
        store.insert_document(&old).unwrap();
        let chunk = sample_chunk(&old, 0, 5, "alpha");
        store.replace_chunks(&old.id, &[chunk.clone()]).unwrap();

        let new = Document::new(
            PathBuf::from("/docs/sample.pdf"),
            vec![Page::text(0, "completely different text")],
        );
        let outcome = store.insert_document(&new).unwrap();

        match outcome {
            InsertOutcome::Superseded { old_chunks } => {
                assert_eq!(old_chunks, vec![chunk.id]);
            }
            other => panic!("expected supersession, got {:?}", other),
        }

        assert!(!store.document_exists(&old.id).unwrap());
        assert!(store.document_exists(&new.id).unwrap());
        assert_eq!(store.chunk_count().unwrap(), 0); // cascade removed old chunks
    }

    #[test]
    fn test_chunk_roundtrip_and_orphan_skip() {
        let store = DocumentStore::in_memory().unwrap();
        let doc = sample_document();
        store.insert_document(&doc).unwrap();

        let chunk = sample_chunk(&doc, 0, 10, "alpha beta");
        store.replace_chunks(&doc.id, &[chunk.clone()]).unwrap();

        let fetched = store.get_chunks(&[chunk.id, ChunkId(42)]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, chunk.id);
        assert_eq!(fetched[0].text, "alpha beta");
    }

    #[test]
    fn test_replace_chunks_replaces() {
        let store = DocumentStore::in_memory().unwrap();
        let doc = sample_document();
        store.insert_document(&doc).unwrap();

        let a = sample_chunk(&doc, 0, 5, "alpha");
        let b = sample_chunk(&doc, 6, 10, "beta");
        store.replace_chunks(&doc.id, &[a.clone(), b]).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 2);

        store.replace_chunks(&doc.id, &[a]).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_pages_counted() {
        let store = DocumentStore::in_memory().unwrap();
        let doc = Document::new(
            PathBuf::from("/d"),
            vec![Page::text(0, "ok"), Page::failed(1, "boom")],
        );
        store.insert_document(&doc).unwrap();

        assert_eq!(store.stats().unwrap().failed_page_count, 1);
    }
}
