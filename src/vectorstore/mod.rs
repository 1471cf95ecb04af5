//! Vector Store Adapter (component B) — dense-vector upsert/search with
//! scalar filters, document-grain atomicity.

mod sqlite;

pub use sqlite::SqliteVectorStore;

use crate::error::AppError;
use crate::metadata::SegmentType;

/// A dense-vector record keyed by `seg_id`, one-to-one with an indexable
/// segment.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub seg_id: String,
    pub doc_id: String,
    pub seg_type: SegmentType,
    pub seg_page_idx: i64,
    pub embedding: Vec<f32>,
}

/// Conjunctive scalar filter applied to a search or upsert scan.
#[derive(Debug, Clone, Default)]
pub struct ScalarFilter {
    pub allowed_doc_ids: Option<Vec<String>>,
}

impl ScalarFilter {
    pub fn doc_ids(ids: Vec<String>) -> Self {
        Self { allowed_doc_ids: Some(ids) }
    }

    fn matches(&self, doc_id: &str) -> bool {
        match &self.allowed_doc_ids {
            Some(ids) => ids.iter().any(|id| id == doc_id),
            None => true,
        }
    }
}

/// Vector Store Adapter contract, per spec §4.2. The similarity metric is
/// cosine (documented here per the spec's requirement to state which).
pub trait VectorStore: Send + Sync {
    /// Idempotent on `seg_id`; all records for one document become visible
    /// atomically (or none do).
    fn upsert(&self, doc_id: &str, records: &[VectorRecord]) -> Result<(), AppError>;

    /// Up to `k` `(seg_id, score)` pairs ordered by cosine similarity
    /// descending.
    fn search(&self, query: &[f32], k: usize, filter: &ScalarFilter) -> Result<Vec<(String, f32)>, AppError>;

    fn delete_by_doc(&self, doc_id: &str) -> Result<(), AppError>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn filter_matches_allowed_ids_only() {
        let f = ScalarFilter::doc_ids(vec!["d1".into(), "d2".into()]);
        assert!(f.matches("d1"));
        assert!(!f.matches("d3"));
        let open = ScalarFilter::default();
        assert!(open.matches("anything"));
    }
}
