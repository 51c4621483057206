/// Key-value-backed flat index: exact cosine scan over sqlite-stored vectors
use super::{EntryMetadata, IndexError, RawHit, SearchFilter, VectorIndex};
use crate::document::ChunkId;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

type DbPool = Pool<SqliteConnectionManager>;

/// Durable flat index. Vectors are stored as little-endian f32 blobs keyed
/// by chunk id and searched with a brute-force cosine scan — exact recall,
/// linear cost, the durability counterpart to the in-process HNSW backend.
pub struct FlatIndex {
    pool: DbPool,
    dimension: usize,
}

impl FlatIndex {
    pub fn open(db_path: &Path, dimension: usize) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::Unavailable(format!("Cannot create index dir: {}", e)))?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let index = Self { pool, dimension };
        index.init_schema()?;
        Ok(index)
    }

    /// In-memory variant for tests and ephemeral runs
    pub fn in_memory(dimension: usize) -> Result<Self, IndexError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let index = Self { pool, dimension };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), IndexError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vectors (
                chunk_id INTEGER PRIMARY KEY,
                document_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                snippet TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(document_id);",
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, IndexError> {
        self.pool
            .get()
            .map_err(|e| IndexError::Unavailable(e.to_string()))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn decode(&self, chunk_id: i64, blob: &[u8]) -> Result<Vec<f32>, IndexError> {
        if blob.len() % 4 != 0 || blob.len() / 4 != self.dimension {
            return Err(IndexError::Corrupt(format!(
                "Vector blob for chunk {} has {} bytes, expected {}",
                chunk_id,
                blob.len(),
                self.dimension * 4
            )));
        }

        Ok(blob
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn map_sqlite_error(e: rusqlite::Error) -> IndexError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::NotADatabase
                || inner.code == rusqlite::ErrorCode::DatabaseCorrupt =>
        {
            IndexError::Corrupt(e.to_string())
        }
        _ => IndexError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: &[f32],
        metadata: &EntryMetadata,
    ) -> Result<(), IndexError> {
        self.check_dimension(vector)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO vectors (chunk_id, document_id, embedding, snippet)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chunk_id) DO UPDATE SET
                 document_id = excluded.document_id,
                 embedding = excluded.embedding,
                 snippet = excluded.snippet",
            params![
                chunk_id.as_i64(),
                metadata.document_id.to_hex(),
                encode(vector),
                metadata.snippet,
            ],
        )
        .map_err(map_sqlite_error)?;

        Ok(())
    }

    async fn delete(&self, chunk_id: ChunkId) -> Result<(), IndexError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM vectors WHERE chunk_id = ?1",
            params![chunk_id.as_i64()],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RawHit>, IndexError> {
        self.check_dimension(query)?;

        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;

        let document_filter = filter.and_then(|f| f.document_id.as_ref()).map(|d| d.to_hex());

        let mut hits = Vec::new();
        let mut scan = |sql: &str, args: &[&dyn rusqlite::ToSql]| -> Result<(), IndexError> {
            let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(args, |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(map_sqlite_error)?;

            for row in rows {
                let (chunk_id, blob) = row.map_err(map_sqlite_error)?;
                let vector = self.decode(chunk_id, &blob)?;
                hits.push(RawHit {
                    chunk_id: ChunkId::from_i64(chunk_id),
                    raw_score: cosine_similarity(query, &vector),
                });
            }
            Ok(())
        };

        match &document_filter {
            Some(document_id) => scan(
                "SELECT chunk_id, embedding FROM vectors WHERE document_id = ?1",
                &[document_id],
            )?,
            None => scan("SELECT chunk_id, embedding FROM vectors", &[])?,
        }

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(count as u64)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "flat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, Page};
    use tempfile::TempDir;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn meta(tag: &str) -> EntryMetadata {
        EntryMetadata {
            document_id: DocumentId::from_pages(&[Page::text(0, tag)]),
            snippet: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_search_exact_order() {
        let index = FlatIndex::in_memory(4).unwrap();
        let m = meta("doc");

        index.upsert(ChunkId(1), &[1.0, 0.0, 0.0, 0.0], &m).await.unwrap();
        index.upsert(ChunkId(2), &[0.9, 0.1, 0.0, 0.0], &m).await.unwrap();
        index.upsert(ChunkId(3), &[0.0, 1.0, 0.0, 0.0], &m).await.unwrap();

        let hits = index.search(&unit(4, 0), 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, ChunkId(1));
        assert_eq!(hits[1].chunk_id, ChunkId(2));
    }

    #[tokio::test]
    async fn test_upsert_replaces_atomically() {
        let index = FlatIndex::in_memory(4).unwrap();
        let m = meta("doc");

        index.upsert(ChunkId(1), &unit(4, 0), &m).await.unwrap();
        index.upsert(ChunkId(1), &unit(4, 3), &m).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);

        let hits = index.search(&unit(4, 3), 1, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, ChunkId(1));
        assert!(hits[0].raw_score > 0.99);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let index = FlatIndex::in_memory(4).unwrap();
        assert!(index.delete(ChunkId(7)).await.is_ok());
    }

    #[tokio::test]
    async fn test_document_filter() {
        let index = FlatIndex::in_memory(4).unwrap();
        let doc_a = meta("a");
        let doc_b = meta("b");

        index.upsert(ChunkId(1), &unit(4, 0), &doc_a).await.unwrap();
        index.upsert(ChunkId(2), &unit(4, 0), &doc_b).await.unwrap();

        let filter = SearchFilter {
            document_id: Some(doc_a.document_id.clone()),
        };
        let hits = index.search(&unit(4, 0), 5, Some(&filter)).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, ChunkId(1));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flat.sqlite");

        {
            let index = FlatIndex::open(&path, 4).unwrap();
            index.upsert(ChunkId(42), &unit(4, 1), &meta("doc")).await.unwrap();
        }

        let index = FlatIndex::open(&path, 4).unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let hits = index.search(&unit(4, 1), 1, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, ChunkId(42));
    }

    #[tokio::test]
    async fn test_malformed_blob_reports_corrupt() {
        let index = FlatIndex::in_memory(4).unwrap();

        {
            let conn = index.conn().unwrap();
            conn.execute(
                "INSERT INTO vectors (chunk_id, document_id, embedding) VALUES (1, 'x', ?1)",
                params![vec![0u8; 7]],
            )
            .unwrap();
        }

        let result = index.search(&unit(4, 0), 1, None).await;
        assert!(matches!(result, Err(IndexError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = FlatIndex::in_memory(4).unwrap();
        let result = index.upsert(ChunkId(1), &[1.0, 2.0], &meta("doc")).await;
        assert!(matches!(result, Err(IndexError::Dimension { .. })));
    }
}
