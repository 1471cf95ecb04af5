//! HTTP backend for OpenAI-compatible embedding/rerank/chat-completion
//! endpoints, grounded on the teacher's `OpenAiCompatibleProvider`
//! (`llm/providers/openai_compatible.rs`): a `reqwest::Client` built once,
//! bearer auth, structured error bodies mapped into the gateway's failure
//! classes.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::ModelGatewayConfig;
use crate::error::GatewayError;
use crate::modelgateway::{ChatTurn, GenerateOptions, TokenUsage};

#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    client: Client,
    embed_base_url: String,
    rerank_base_url: String,
    generate_base_url: String,
    embed_model: String,
    rerank_model: String,
    generate_model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(cfg: &ModelGatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            embed_base_url: cfg.embed_base_url.clone(),
            rerank_base_url: cfg.rerank_base_url.clone(),
            generate_base_url: cfg.generate_base_url.clone(),
            embed_model: cfg.embed_model.clone(),
            rerank_model: cfg.rerank_model.clone(),
            generate_model: cfg.generate_model.clone(),
            api_key: cfg.api_key.clone(),
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let payload = EmbedRequest { model: self.embed_model.clone(), input: texts.to_vec() };
        debug!(count = texts.len(), "model gateway: embed request");

        let req = self.authed(self.client.post(&self.embed_base_url).json(&payload));
        let response = req.send().await.map_err(classify_transport_error)?;
        let response = check_status(response).await?;

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(format!("malformed embed response: {e}")))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    pub async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, GatewayError> {
        let payload = RerankRequest {
            model: self.rerank_model.clone(),
            query: query.to_string(),
            documents: docs.to_vec(),
        };
        debug!(doc_count = docs.len(), "model gateway: rerank request");

        let req = self.authed(self.client.post(&self.rerank_base_url).json(&payload));
        let response = req.send().await.map_err(classify_transport_error)?;
        let response = check_status(response).await?;

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(format!("malformed rerank response: {e}")))?;

        let mut scores = vec![0.0f32; docs.len()];
        for r in parsed.results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.relevance_score;
            }
        }
        Ok(scores)
    }

    pub async fn generate(
        &self,
        messages: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<(String, TokenUsage), GatewayError> {
        let payload = ChatCompletionRequest {
            model: self.generate_model.clone(),
            messages: messages
                .iter()
                .map(|m| Message { role: m.role.to_string(), content: m.content.clone() })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop.clone(),
        };
        debug!(model = %payload.model, "model gateway: generate request");

        let req = self.authed(self.client.post(&self.generate_base_url).json(&payload));
        let response = req.send().await.map_err(classify_transport_error)?;
        let response = check_status(response).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(format!("malformed generate response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Permanent("empty choices in generate response".into()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens })
            .unwrap_or_default();

        Ok((text, usage))
    }
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() || e.is_connect() {
        GatewayError::Transient(format!("transport error: {e}"))
    } else {
        GatewayError::Transient(format!("request failed: {e}"))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
    error!(%status, %body, "model gateway: backend returned error status");

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(GatewayError::Transient(format!("HTTP {status}: {body}")))
    } else {
        Err(GatewayError::Permanent(format!("HTTP {status}: {body}")))
    }
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageData {
    prompt_tokens: u32,
    completion_tokens: u32,
}
