//! Deterministic, network-free backend. Used in tests and as the default
//! when no model provider is configured, following the teacher's
//! `DummyProvider` (`llm/providers/dummy.rs`).

use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::modelgateway::{ChatTurn, GenerateOptions, TokenUsage};

const MAX_INPUT_CHARS: usize = 32_000;

#[derive(Clone)]
pub struct DummyBackend {
    dim: usize,
}

impl DummyBackend {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Hash `text` into a deterministic unit vector of length `dim`. Not a
    /// real embedding model — exists so retrieval logic can be exercised
    /// without network access.
    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut v = Vec::with_capacity(self.dim);
        let mut seed = digest.to_vec();
        while v.len() < self.dim {
            let mut hasher = Sha256::new();
            hasher.update(&seed);
            seed = hasher.finalize().to_vec();
            for byte in &seed {
                if v.len() >= self.dim {
                    break;
                }
                v.push((*byte as f32 / 255.0) * 2.0 - 1.0);
            }
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        for t in texts {
            if t.len() > MAX_INPUT_CHARS {
                return Err(GatewayError::OverlongInput(format!(
                    "input of {} chars exceeds limit of {MAX_INPUT_CHARS}",
                    t.len()
                )));
            }
        }
        Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
    }

    pub async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, GatewayError> {
        let query_tokens: std::collections::HashSet<&str> = query.split_whitespace().collect();
        Ok(docs
            .iter()
            .map(|d| {
                let doc_tokens: std::collections::HashSet<&str> = d.split_whitespace().collect();
                let overlap = query_tokens.intersection(&doc_tokens).count();
                overlap as f32 / (query_tokens.len().max(1) as f32)
            })
            .collect())
    }

    pub async fn generate(
        &self,
        messages: &[ChatTurn],
        _options: &GenerateOptions,
    ) -> Result<(String, TokenUsage), GatewayError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        if last_user.len() > MAX_INPUT_CHARS {
            return Err(GatewayError::OverlongInput(format!(
                "prompt of {} chars exceeds limit of {MAX_INPUT_CHARS}",
                last_user.len()
            )));
        }
        let prompt_tokens: u32 = messages.iter().map(|m| (m.content.len() / 4).max(1) as u32).sum();
        let text = format!("[dummy-answer] {}", last_user);
        let completion_tokens = (text.len() / 4).max(1) as u32;
        Ok((text, TokenUsage { prompt_tokens, completion_tokens }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embed_is_deterministic() {
        let b = DummyBackend::new(16);
        let v1 = b.hash_embed("hello");
        let v2 = b.hash_embed("hello");
        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 16);
    }

    #[tokio::test]
    async fn different_text_gives_different_vector() {
        let b = DummyBackend::new(16);
        assert_ne!(b.hash_embed("hello"), b.hash_embed("goodbye"));
    }

    #[tokio::test]
    async fn overlong_embed_input_rejected() {
        let b = DummyBackend::new(8);
        let huge = "x".repeat(MAX_INPUT_CHARS + 1);
        let err = b.embed(&[huge]).await.unwrap_err();
        assert!(matches!(err, GatewayError::OverlongInput(_)));
    }

    #[tokio::test]
    async fn rerank_prefers_overlapping_doc() {
        let b = DummyBackend::new(8);
        let docs = vec!["totally unrelated".to_string(), "quarterly revenue report".to_string()];
        let scores = b.rerank("quarterly revenue", &docs).await.unwrap();
        assert!(scores[1] > scores[0]);
    }
}
