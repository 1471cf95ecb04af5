//! Hybrid Retriever (component G) — parallel dense+lexical search,
//! permission filtering, min-max fusion, and cross-encoder rerank, per
//! spec §4.7.
//!
//! The two backend searches run concurrently via `tokio::join!`, mirroring
//! the teacher's pattern of fanning out independent blocking calls through
//! `tokio::task::spawn_blocking` rather than holding a lock across an
//! await point.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::AppError;
use crate::lexical::LexicalStore;
use crate::metadata::MetadataStore;
use crate::modelgateway::ModelGateway;
use crate::vectorstore::{ScalarFilter, VectorStore};

/// One fused-and-reranked retrieval hit.
#[derive(Debug, Clone)]
pub struct RetrievedSegment {
    pub doc_id: String,
    pub seg_id: String,
    pub seg_page_idx: i64,
    pub rerank_score: f32,
    pub fused_score: f32,
    pub content: String,
    pub seg_caption: Option<String>,
    pub seg_footnote: Option<String>,
}

/// Result of a retrieval call. `reason` is set (and `results` empty) when
/// retrieval was short-circuited, e.g. by an empty permission set.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievedSegment>,
    pub reason: Option<String>,
}

pub struct HybridRetriever {
    metadata: Arc<dyn MetadataStore>,
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    gateway: Arc<ModelGateway>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        gateway: Arc<ModelGateway>,
        config: RetrievalConfig,
    ) -> Self {
        Self { metadata, vector, lexical, gateway, config }
    }

    /// Run the full retrieval pipeline for `query` scoped to `subject_id`.
    pub async fn retrieve(&self, subject_id: &str, query: &str) -> Result<RetrievalOutcome, AppError> {
        let allowed = {
            let metadata = self.metadata.clone();
            let subject_id = subject_id.to_string();
            tokio::task::spawn_blocking(move || metadata.authorized_doc_ids(&subject_id))
                .await
                .map_err(|e| AppError::Retrieval(format!("authorized_doc_ids task panicked: {e}")))??
        };

        if allowed.is_empty() {
            return Ok(RetrievalOutcome { results: Vec::new(), reason: Some("no-permitted-documents".to_string()) });
        }
        let filter = ScalarFilter::doc_ids(allowed);

        let query_vec = self
            .gateway
            .embed(&[query.to_string()])
            .await
            .map_err(AppError::ModelGateway)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Retrieval("embed returned no vector for query".to_string()))?;

        let candidate_k = self.config.candidate_k;
        let (dense, lex) = tokio::join!(
            {
                let vector = self.vector.clone();
                let filter = filter.clone();
                let query_vec = query_vec.clone();
                tokio::task::spawn_blocking(move || vector.search(&query_vec, candidate_k, &filter))
            },
            {
                let lexical = self.lexical.clone();
                let filter = filter.clone();
                let query = query.to_string();
                tokio::task::spawn_blocking(move || lexical.search(&query, candidate_k, &filter))
            }
        );
        let dense = dense.map_err(|e| AppError::Retrieval(format!("dense search task panicked: {e}")))??;
        let lex = lex.map_err(|e| AppError::Retrieval(format!("lexical search task panicked: {e}")))??;

        let fused = fuse(&dense, &lex, self.config.alpha);
        let rerank_candidates: Vec<_> = fused.into_iter().take(self.config.rerank_k).collect();

        let mut hydrated = Vec::with_capacity(rerank_candidates.len());
        for (seg_id, fused_score, _dense_raw) in rerank_candidates {
            let metadata = self.metadata.clone();
            let seg_id_owned = seg_id.clone();
            let segment = tokio::task::spawn_blocking(move || metadata.get_segment(&seg_id_owned))
                .await
                .map_err(|e| AppError::Retrieval(format!("get_segment task panicked: {e}")))??;
            match segment {
                Some(seg) => hydrated.push((seg, fused_score)),
                // Race with a concurrent delete: drop silently per spec §4.7 edge cases.
                None => warn!(%seg_id, "retrieval candidate vanished from metadata store, dropping"),
            }
        }

        if hydrated.is_empty() {
            return Ok(RetrievalOutcome::default());
        }

        let contents: Vec<String> = hydrated.iter().map(|(seg, _)| seg.seg_content.clone()).collect();
        let rerank_scores = self.gateway.rerank(query, &contents).await.map_err(AppError::ModelGateway)?;

        let mut scored: Vec<RetrievedSegment> = hydrated
            .into_iter()
            .zip(rerank_scores)
            .map(|((seg, fused_score), rerank_score)| RetrievedSegment {
                doc_id: seg.doc_id,
                seg_id: seg.seg_id,
                seg_page_idx: seg.seg_page_idx,
                rerank_score,
                fused_score,
                content: seg.seg_content,
                seg_caption: seg.seg_caption,
                seg_footnote: seg.seg_footnote,
            })
            .collect();

        scored.sort_by(|a, b| b.rerank_score.partial_cmp(&a.rerank_score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_k);

        Ok(RetrievalOutcome { results: scored, reason: None })
    }
}

/// Min-max normalize each list over the union of candidate `seg_id`s (a
/// `seg_id` absent from one list contributes a raw score of 0 to that
/// list's normalization domain), then combine with `alpha` weight on dense.
/// Tie-break by raw dense score. Returns `(seg_id, fused_score, dense_raw)`
/// sorted descending by fused score.
fn fuse(dense: &[(String, f32)], lex: &[(String, f32)], alpha: f32) -> Vec<(String, f32, f32)> {
    let dense_map: HashMap<&str, f32> = dense.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    let lex_map: HashMap<&str, f32> = lex.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let mut union: Vec<&str> = dense_map.keys().chain(lex_map.keys()).copied().collect();
    union.sort_unstable();
    union.dedup();

    let dense_raw: Vec<f32> = union.iter().map(|id| *dense_map.get(id).unwrap_or(&0.0)).collect();
    let lex_raw: Vec<f32> = union.iter().map(|id| *lex_map.get(id).unwrap_or(&0.0)).collect();

    let dense_norm = min_max_normalize(&dense_raw);
    let lex_norm = min_max_normalize(&lex_raw);

    let mut out: Vec<(String, f32, f32)> = union
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let fused = alpha * dense_norm[i] + (1.0 - alpha) * lex_norm[i];
            (id.to_string(), fused, dense_raw[i])
        })
        .collect();

    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
    });
    out
}

fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_matches_worked_example() {
        // spec §8 scenario 6: dense{A:1.0,B:0.5}, lex{B:1.0,C:0.7}, alpha=0.6
        // => ranking B > A > C.
        let dense = vec![("A".to_string(), 1.0), ("B".to_string(), 0.5)];
        let lex = vec![("B".to_string(), 1.0), ("C".to_string(), 0.7)];
        let fused = fuse(&dense, &lex, 0.6);
        let order: Vec<&str> = fused.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn normalize_handles_constant_list() {
        let norm = min_max_normalize(&[0.5, 0.5, 0.5]);
        assert_eq!(norm, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn normalize_empty_list() {
        assert!(min_max_normalize(&[]).is_empty());
    }
}
