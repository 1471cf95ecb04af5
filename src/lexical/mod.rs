//! Lexical Store Adapter (component C) — BM25 full-text search over
//! analyzed segment content.

mod sqlite;

pub use sqlite::SqliteLexicalStore;

use crate::error::AppError;
use crate::metadata::SegmentType;
use crate::vectorstore::ScalarFilter;

/// An analyzed-text record keyed by `seg_id`, mirroring the scalar
/// attributes of the corresponding [`crate::vectorstore::VectorRecord`].
#[derive(Debug, Clone)]
pub struct LexicalRecord {
    pub seg_id: String,
    pub doc_id: String,
    pub seg_type: SegmentType,
    pub seg_page_idx: i64,
    pub content: String,
}

/// Lexical Store Adapter contract, per spec §4.3. `filter` has the same
/// semantics as [`crate::vectorstore::VectorStore::search`].
pub trait LexicalStore: Send + Sync {
    /// Idempotent on `seg_id`.
    fn index(&self, records: &[LexicalRecord]) -> Result<(), AppError>;

    /// Up to `k` `(seg_id, bm25_score)` pairs, higher-is-better (the raw
    /// FTS5 BM25 rank is negated — FTS5 reports lower-is-better).
    fn search(&self, query: &str, k: usize, filter: &ScalarFilter) -> Result<Vec<(String, f32)>, AppError>;

    fn delete_by_doc(&self, doc_id: &str) -> Result<(), AppError>;
}

/// Escape a user query for FTS5's `MATCH` mini-language: whitespace splits
/// into tokens, and any token with non-alphanumeric characters is quoted
/// (internal quotes doubled) so the query can't break FTS5 syntax. This
/// treats the query as a bag of required terms rather than attempting to
/// parse user-supplied boolean operators.
pub(crate) fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            if tok.chars().all(|c| c.is_alphanumeric()) {
                tok.to_string()
            } else {
                format!("\"{}\"", tok.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tokens_pass_through() {
        assert_eq!(escape_fts5_query("hello world"), "hello world");
    }

    #[test]
    fn punctuation_gets_quoted() {
        assert_eq!(escape_fts5_query("a\"b c"), "\"a\"\"b\" c");
    }
}
