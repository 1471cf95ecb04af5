//! Model Gateway (component D) — embedding, reranking, and generation,
//! batched and rate-limited, per spec §4.4.
//!
//! Backend dispatch follows the teacher's `LlmProvider` enum-dispatch
//! pattern (`llm/mod.rs`): one variant per concrete provider, no `dyn`
//! trait objects or `async-trait` machinery needed at this boundary.

mod backends;
mod ratelimit;
mod retry;

pub use ratelimit::RateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};

use serde::{Deserialize, Serialize};

use crate::config::ModelGatewayConfig;
use crate::error::GatewayError;

use backends::dummy::DummyBackend;
use backends::openai_compatible::OpenAiCompatibleBackend;

/// Token usage reported by a single `generate` call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Options accepted by [`ModelGateway::generate`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { temperature: 0.2, max_tokens: 1024, stop: Vec::new() }
    }
}

/// A single chat message in a `generate` request.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant", content: content.into() }
    }
}

/// Backend dispatch enum. `Dummy` is deterministic and network-free, used in
/// tests and as a safe default when no model endpoint is configured.
#[derive(Clone)]
enum Backend {
    Dummy(DummyBackend),
    OpenAiCompatible(OpenAiCompatibleBackend),
}

/// The Model Gateway: bounded concurrency, rate limiting, and retry wrapped
/// around a concrete [`Backend`].
pub struct ModelGateway {
    backend: Backend,
    limiter: RateLimiter,
    retry_policy: RetryPolicy,
    embed_dim: usize,
}

impl ModelGateway {
    /// Build a gateway from config. `provider = "dummy"` (or any unrecognised
    /// value) selects the network-free backend so the service degrades
    /// safely rather than failing to start.
    pub fn from_config(cfg: &ModelGatewayConfig, embed_dim: usize) -> Self {
        let backend = match cfg.provider.as_str() {
            "openai_compatible" | "openai" => Backend::OpenAiCompatible(OpenAiCompatibleBackend::new(cfg)),
            _ => Backend::Dummy(DummyBackend::new(embed_dim)),
        };
        Self {
            backend,
            limiter: RateLimiter::new(cfg.rate_limit_per_minute, cfg.max_concurrent_requests),
            retry_policy: RetryPolicy::new(cfg.max_retries),
            embed_dim,
        }
    }

    #[cfg(test)]
    pub fn dummy_for_tests(embed_dim: usize) -> Self {
        Self {
            backend: Backend::Dummy(DummyBackend::new(embed_dim)),
            limiter: RateLimiter::new(6000, 8),
            retry_policy: RetryPolicy::new(2),
            embed_dim,
        }
    }

    /// Embed a batch of texts. Inputs exceeding the backend's length limit
    /// fail with `OverlongInput` and are never retried; transient failures
    /// retry with exponential backoff and full jitter.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let _permit = self.limiter.acquire().await?;
        retry_with_backoff(&self.retry_policy, || async { self.backend.embed(texts).await }).await
    }

    pub async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, GatewayError> {
        let _permit = self.limiter.acquire().await?;
        retry_with_backoff(&self.retry_policy, || async { self.backend.rerank(query, docs).await }).await
    }

    pub async fn generate(
        &self,
        messages: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<(String, TokenUsage), GatewayError> {
        let _permit = self.limiter.acquire().await?;
        retry_with_backoff(&self.retry_policy, || async { self.backend.generate(messages, options).await }).await
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}

impl Backend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        match self {
            Backend::Dummy(b) => b.embed(texts).await,
            Backend::OpenAiCompatible(b) => b.embed(texts).await,
        }
    }

    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, GatewayError> {
        match self {
            Backend::Dummy(b) => b.rerank(query, docs).await,
            Backend::OpenAiCompatible(b) => b.rerank(query, docs).await,
        }
    }

    async fn generate(
        &self,
        messages: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<(String, TokenUsage), GatewayError> {
        match self {
            Backend::Dummy(b) => b.generate(messages, options).await,
            Backend::OpenAiCompatible(b) => b.generate(messages, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dummy_embed_is_deterministic_and_right_dim() {
        let gw = ModelGateway::dummy_for_tests(8);
        let a = gw.embed(&["hello".to_string()]).await.unwrap();
        let b = gw.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[tokio::test]
    async fn dummy_rerank_scores_len_matches_docs() {
        let gw = ModelGateway::dummy_for_tests(8);
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scores = gw.rerank("query", &docs).await.unwrap();
        assert_eq!(scores.len(), docs.len());
    }

    #[tokio::test]
    async fn dummy_generate_returns_nonempty_text() {
        let gw = ModelGateway::dummy_for_tests(8);
        let (text, usage) = gw
            .generate(&[ChatTurn::user("hi")], &GenerateOptions::default())
            .await
            .unwrap();
        assert!(!text.is_empty());
        assert!(usage.prompt_tokens > 0);
    }
}
