//! SQLite FTS5-backed reference [`super::LexicalStore`]. Uses the
//! `unicode61` tokenizer (adequate for Latin text out of the box; CJK
//! segmentation quality is a known reference-adapter limitation — see
//! DESIGN.md — a production Elasticsearch adapter behind the same trait
//! would use a proper CJK analyzer).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use crate::error::AppError;
use crate::vectorstore::ScalarFilter;

use super::{LexicalRecord, LexicalStore, escape_fts5_query};

pub struct SqliteLexicalStore {
    conn: Mutex<Connection>,
}

impl SqliteLexicalStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Lexical(format!("create db dir: {e}")))?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Lexical(format!("open {}: {e}", db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Lexical(format!("set journal_mode: {e}")))?;
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS lexical_records USING fts5(
                seg_id UNINDEXED,
                doc_id UNINDEXED,
                seg_type UNINDEXED,
                seg_page_idx UNINDEXED,
                content,
                tokenize = 'unicode61'
             );",
        )
        .map_err(|e| AppError::Lexical(format!("init schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LexicalStore for SqliteLexicalStore {
    fn index(&self, records: &[LexicalRecord]) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Lexical(format!("index begin: {e}")))?;
        for r in records {
            tx.execute(
                "DELETE FROM lexical_records WHERE seg_id = ?1",
                params![r.seg_id],
            )
            .map_err(|e| AppError::Lexical(format!("index delete-before-insert: {e}")))?;
            tx.execute(
                "INSERT INTO lexical_records (seg_id, doc_id, seg_type, seg_page_idx, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.seg_id, r.doc_id, r.seg_type.as_str(), r.seg_page_idx, r.content],
            )
            .map_err(|e| AppError::Lexical(format!("index insert: {e}")))?;
        }
        tx.commit()
            .map_err(|e| AppError::Lexical(format!("index commit: {e}")))?;
        Ok(())
    }

    fn search(&self, query: &str, k: usize, filter: &ScalarFilter) -> Result<Vec<(String, f32)>, AppError> {
        let escaped = escape_fts5_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT seg_id, doc_id, bm25(lexical_records) AS rank
                 FROM lexical_records WHERE lexical_records MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )
            .map_err(|e| AppError::Lexical(format!("search prepare: {e}")))?;

        // Over-fetch before filtering by doc_id since FTS5's own LIMIT
        // can't see the scalar filter.
        let fetch_k = (k * 4).max(k).max(50);
        let rows = stmt
            .query_map(params![escaped, fetch_k as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                ))
            })
            .map_err(|e| AppError::Lexical(format!("search query: {e}")))?;

        let mut scored = Vec::new();
        for row in rows {
            let (seg_id, doc_id, rank) =
                row.map_err(|e| AppError::Lexical(format!("search row: {e}")))?;
            if !matches_filter(filter, &doc_id) {
                continue;
            }
            // FTS5's bm25() is lower-is-better; negate so the retriever's
            // "higher is better" convention holds uniformly across B and C.
            scored.push((seg_id, -(rank as f32)));
            if scored.len() >= k {
                break;
            }
        }

        Ok(scored)
    }

    fn delete_by_doc(&self, doc_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM lexical_records WHERE doc_id = ?1",
            params![doc_id],
        )
        .map_err(|e| AppError::Lexical(format!("delete_by_doc: {e}")))?;
        Ok(())
    }
}

fn matches_filter(filter: &ScalarFilter, doc_id: &str) -> bool {
    match &filter.allowed_doc_ids {
        Some(ids) => ids.iter().any(|id| id == doc_id),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SegmentType;
    use tempfile::TempDir;

    fn rec(seg_id: &str, doc_id: &str, content: &str) -> LexicalRecord {
        LexicalRecord {
            seg_id: seg_id.to_string(),
            doc_id: doc_id.to_string(),
            seg_type: SegmentType::Text,
            seg_page_idx: 1,
            content: content.to_string(),
        }
    }

    #[test]
    fn index_then_search_finds_matching_term() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap();
        store
            .index(&[rec("s1", "d1", "quarterly revenue report"), rec("s2", "d1", "unrelated text")])
            .unwrap();
        let results = store.search("revenue", 10, &ScalarFilter::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "s1");
    }

    #[test]
    fn index_is_idempotent_on_seg_id() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap();
        store.index(&[rec("s1", "d1", "alpha")]).unwrap();
        store.index(&[rec("s1", "d1", "beta")]).unwrap();
        assert!(store.search("alpha", 10, &ScalarFilter::default()).unwrap().is_empty());
        assert_eq!(store.search("beta", 10, &ScalarFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn filter_excludes_other_docs() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap();
        store.index(&[rec("s1", "d1", "shared keyword"), rec("s2", "d2", "shared keyword")]).unwrap();
        let results = store
            .search("shared", 10, &ScalarFilter::doc_ids(vec!["d1".into()]))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "s1");
    }

    #[test]
    fn delete_by_doc_removes_its_records() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap();
        store.index(&[rec("s1", "d1", "alpha beta")]).unwrap();
        store.delete_by_doc("d1").unwrap();
        assert!(store.search("alpha", 10, &ScalarFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn empty_query_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap();
        store.index(&[rec("s1", "d1", "alpha")]).unwrap();
        assert!(store.search("   ", 10, &ScalarFilter::default()).unwrap().is_empty());
    }
}
