//! SQLite-backed reference [`super::VectorStore`]: dense vectors stored as
//! little-endian `f32` BLOBs, similarity computed brute-force over the
//! scalar-filtered candidate set. Adequate for the reference adapter; a
//! production deployment would swap in Milvus/IVF-HNSW behind the same
//! trait.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use crate::error::AppError;

use super::{ScalarFilter, VectorRecord, VectorStore, cosine_similarity};

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for x in v {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    dim: usize,
}

impl SqliteVectorStore {
    pub fn open(db_path: &Path, dim: usize) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::VectorStore(format!("create db dir: {e}")))?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| AppError::VectorStore(format!("open {}: {e}", db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::VectorStore(format!("set journal_mode: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vector_records (
                seg_id       TEXT PRIMARY KEY,
                doc_id       TEXT NOT NULL,
                seg_type     TEXT NOT NULL,
                seg_page_idx INTEGER NOT NULL,
                embedding    BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_vector_records_doc_id ON vector_records(doc_id);",
        )
        .map_err(|e| AppError::VectorStore(format!("init schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn), dim })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, doc_id: &str, records: &[VectorRecord]) -> Result<(), AppError> {
        for r in records {
            if r.embedding.len() != self.dim {
                return Err(AppError::VectorStore(format!(
                    "embedding for {} has dim {}, expected {}",
                    r.seg_id,
                    r.embedding.len(),
                    self.dim
                )));
            }
        }

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::VectorStore(format!("upsert begin: {e}")))?;
        for r in records {
            tx.execute(
                "INSERT INTO vector_records (seg_id, doc_id, seg_type, seg_page_idx, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(seg_id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    seg_type = excluded.seg_type,
                    seg_page_idx = excluded.seg_page_idx,
                    embedding = excluded.embedding",
                params![
                    r.seg_id,
                    doc_id,
                    r.seg_type.as_str(),
                    r.seg_page_idx,
                    encode_vector(&r.embedding),
                ],
            )
            .map_err(|e| AppError::VectorStore(format!("upsert: {e}")))?;
        }
        tx.commit()
            .map_err(|e| AppError::VectorStore(format!("upsert commit: {e}")))?;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, filter: &ScalarFilter) -> Result<Vec<(String, f32)>, AppError> {
        if query.len() != self.dim {
            return Err(AppError::VectorStore(format!(
                "query embedding has dim {}, expected {}",
                query.len(),
                self.dim
            )));
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT seg_id, doc_id, embedding FROM vector_records")
            .map_err(|e| AppError::VectorStore(format!("search prepare: {e}")))?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(|e| AppError::VectorStore(format!("search query: {e}")))?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for row in rows {
            let (seg_id, doc_id, blob) = row.map_err(|e| AppError::VectorStore(format!("search row: {e}")))?;
            if !filter.matches(&doc_id) {
                continue;
            }
            let emb = decode_vector(&blob);
            let score = cosine_similarity(query, &emb);
            scored.push((seg_id, score));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn delete_by_doc(&self, doc_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute("DELETE FROM vector_records WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| AppError::VectorStore(format!("delete_by_doc: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SegmentType;
    use tempfile::TempDir;

    fn rec(seg_id: &str, doc_id: &str, v: Vec<f32>) -> VectorRecord {
        VectorRecord {
            seg_id: seg_id.to_string(),
            doc_id: doc_id.to_string(),
            seg_type: SegmentType::Text,
            seg_page_idx: 1,
            embedding: v,
        }
    }

    #[test]
    fn upsert_then_search_returns_nearest_first() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 2).unwrap();
        store
            .upsert("d1", &[rec("s1", "d1", vec![1.0, 0.0]), rec("s2", "d1", vec![0.0, 1.0])])
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2, &ScalarFilter::default()).unwrap();
        assert_eq!(results[0].0, "s1");
    }

    #[test]
    fn upsert_is_idempotent_on_seg_id() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 2).unwrap();
        store.upsert("d1", &[rec("s1", "d1", vec![1.0, 0.0])]).unwrap();
        store.upsert("d1", &[rec("s1", "d1", vec![0.0, 1.0])]).unwrap();
        let results = store.search(&[0.0, 1.0], 5, &ScalarFilter::default()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn filter_excludes_other_docs() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 2).unwrap();
        store.upsert("d1", &[rec("s1", "d1", vec![1.0, 0.0])]).unwrap();
        store.upsert("d2", &[rec("s2", "d2", vec![1.0, 0.0])]).unwrap();
        let results = store
            .search(&[1.0, 0.0], 5, &ScalarFilter::doc_ids(vec!["d1".into()]))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "s1");
    }

    #[test]
    fn delete_by_doc_removes_all_its_records() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 2).unwrap();
        store
            .upsert("d1", &[rec("s1", "d1", vec![1.0, 0.0]), rec("s2", "d1", vec![0.0, 1.0])])
            .unwrap();
        store.delete_by_doc("d1").unwrap();
        let results = store.search(&[1.0, 0.0], 5, &ScalarFilter::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn dimension_mismatch_errors() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 2).unwrap();
        let err = store.upsert("d1", &[rec("s1", "d1", vec![1.0, 0.0, 0.0])]).unwrap_err();
        assert!(matches!(err, AppError::VectorStore(_)));
    }
}
