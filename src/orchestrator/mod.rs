//! RAG Orchestrator (component H) — query rewrite, retrieval, context
//! assembly, generation, source attribution, and session persistence,
//! per spec §4.8.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

use crate::config::RetrievalConfig;
use crate::error::AppError;
use crate::metadata::{ChatMessage, MessageMetadata, MessageType, MetadataStore, SourceRef};
use crate::modelgateway::{ChatTurn, GenerateOptions, ModelGateway};
use crate::retriever::HybridRetriever;

const MAX_QUERY_CHARS: usize = 2000;
const REFUSAL_TEMPLATE: &str =
    "I don't have enough information in the knowledge base to answer that question.";

/// The `answer()` response contract.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
}

/// Per-session single-writer stripe: each session gets its own async mutex,
/// taken for the duration of a request so concurrent turns on the same
/// session never interleave, per spec §5 ordering guarantees.
struct SessionLocks {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    fn new() -> Self {
        Self { locks: StdMutex::new(HashMap::new()) }
    }

    fn get(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

pub struct RagOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    retriever: Arc<HybridRetriever>,
    gateway: Arc<ModelGateway>,
    config: RetrievalConfig,
    session_locks: SessionLocks,
}

impl RagOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        retriever: Arc<HybridRetriever>,
        gateway: Arc<ModelGateway>,
        config: RetrievalConfig,
    ) -> Self {
        Self { metadata, retriever, gateway, config, session_locks: SessionLocks::new() }
    }

    pub async fn answer(&self, session_id: &str, subject_id: &str, query: &str) -> Result<AnswerResult, AppError> {
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::Validation(format!(
                "query of {} characters exceeds the {MAX_QUERY_CHARS} character limit",
                query.chars().count()
            )));
        }

        let session_lock = self.session_locks.get(session_id);
        let _guard = session_lock.lock().await;

        let started = Instant::now();
        let history = self.load_history(session_id).await?;

        let rewritten_query = if history.is_empty() {
            None
        } else {
            match self.rewrite_query(&history, query).await {
                Ok(rewritten) => Some(rewritten),
                Err(e) => {
                    warn!(%session_id, error = %e, "query rewrite failed, falling back to the raw query");
                    None
                }
            }
        };
        let effective_query = rewritten_query.as_deref().unwrap_or(query);

        let outcome = self.retriever.retrieve(subject_id, effective_query).await?;

        self.persist_human_turn(session_id, query).await;

        if outcome.results.is_empty() {
            let elapsed = started.elapsed().as_millis() as u64;
            self.persist_ai_turn(session_id, REFUSAL_TEMPLATE, &[], &rewritten_query, None, elapsed, None).await;
            return Ok(AnswerResult {
                answer: REFUSAL_TEMPLATE.to_string(),
                sources: Vec::new(),
                tokens_used: 0,
                processing_time_ms: elapsed,
            });
        }

        let (context, sources) = assemble_context(&outcome.results, self.config.context_max, &self.metadata).await;

        let system_prompt = "Answer only using the provided context. If the context does not support an answer, \
             reply exactly with the refusal sentence you were given and nothing else."
            .to_string();
        let messages = vec![
            ChatTurn::system(format!("{system_prompt}\n\nContext:\n{context}")),
            ChatTurn::user(effective_query.to_string()),
        ];

        let generation = self.gateway.generate(&messages, &GenerateOptions::default()).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match generation {
            Ok((text, usage)) if !text.trim().is_empty() => {
                self.persist_ai_turn(
                    session_id,
                    &text,
                    &sources,
                    &rewritten_query,
                    Some(crate::metadata::TokenUsage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                    }),
                    elapsed,
                    None,
                )
                .await;
                Ok(AnswerResult { answer: text, sources, tokens_used: usage.total(), processing_time_ms: elapsed })
            }
            Ok(_) => {
                error!(%session_id, "generation returned empty text");
                self.persist_ai_turn(session_id, "", &sources, &rewritten_query, None, elapsed, Some("empty generation")).await;
                Err(AppError::Orchestrator("generation returned an empty answer".to_string()))
            }
            Err(e) => {
                error!(%session_id, error = %e, "generation failed");
                self.persist_ai_turn(session_id, "", &sources, &rewritten_query, None, elapsed, Some(&e.to_string())).await;
                Err(AppError::ModelGateway(e))
            }
        }
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let metadata = self.metadata.clone();
        let session_id = session_id.to_string();
        let history_max = self.config.history_max;
        tokio::task::spawn_blocking(move || metadata.load_recent_messages(&session_id, history_max))
            .await
            .map_err(|e| AppError::Orchestrator(format!("load_history task panicked: {e}")))?
    }

    async fn rewrite_query(&self, history: &[ChatMessage], query: &str) -> Result<String, AppError> {
        let mut messages: Vec<ChatTurn> = vec![ChatTurn::system(
            "Rewrite the user's latest message into a self-contained question, using the prior \
             conversation for context. Reply with only the rewritten question.",
        )];
        for turn in history {
            match turn.message_type {
                MessageType::Human => messages.push(ChatTurn::user(turn.content.clone())),
                MessageType::Ai => messages.push(ChatTurn::assistant(turn.content.clone())),
            }
        }
        messages.push(ChatTurn::user(query.to_string()));

        let (text, _usage) =
            self.gateway.generate(&messages, &GenerateOptions::default()).await.map_err(AppError::ModelGateway)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }

    async fn persist_human_turn(&self, session_id: &str, content: &str) {
        let metadata = self.metadata.clone();
        let session_id = session_id.to_string();
        let content = content.to_string();
        let result = tokio::task::spawn_blocking(move || {
            metadata.append_message(&session_id, MessageType::Human, &content, None)
        })
        .await;
        if let Err(e) = result.unwrap_or_else(|e| Err(AppError::Orchestrator(format!("task panicked: {e}")))) {
            warn!(error = %e, "failed to persist human turn");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_ai_turn(
        &self,
        session_id: &str,
        content: &str,
        sources: &[SourceRef],
        rewritten_query: &Option<String>,
        token_usage: Option<crate::metadata::TokenUsage>,
        latency_ms: u64,
        error: Option<&str>,
    ) {
        let metadata_record = MessageMetadata {
            version: 1,
            sources: sources.to_vec(),
            rewritten_query: rewritten_query.clone(),
            token_usage,
            latency_ms: Some(latency_ms),
            error: error.map(|e| e.to_string()),
        };
        let metadata = self.metadata.clone();
        let session_id = session_id.to_string();
        let content = content.to_string();
        let result = tokio::task::spawn_blocking(move || {
            metadata.append_message(&session_id, MessageType::Ai, &content, Some(&metadata_record))
        })
        .await;
        if let Err(e) = result.unwrap_or_else(|e| Err(AppError::Orchestrator(format!("task panicked: {e}")))) {
            warn!(error = %e, "failed to persist AI turn");
        }
    }
}

/// Concatenate retrieved segments in fused-rank order, tagging each with
/// `[doc_name, page_idx]`, stopping once the cumulative character budget is
/// reached. `doc_name` is resolved via a metadata lookup per distinct
/// `doc_id` encountered.
async fn assemble_context(
    results: &[crate::retriever::RetrievedSegment],
    context_max: usize,
    metadata: &Arc<dyn MetadataStore>,
) -> (String, Vec<SourceRef>) {
    let mut context = String::new();
    let mut sources = Vec::new();
    let mut doc_names: HashMap<String, String> = HashMap::new();

    for seg in results {
        let doc_name = if let Some(name) = doc_names.get(&seg.doc_id) {
            name.clone()
        } else {
            let metadata = metadata.clone();
            let doc_id = seg.doc_id.clone();
            let name = tokio::task::spawn_blocking(move || metadata.get_document(&doc_id))
                .await
                .ok()
                .and_then(|r| r.ok())
                .flatten()
                .map(|d| d.display_name)
                .unwrap_or_else(|| seg.doc_id.clone());
            doc_names.insert(seg.doc_id.clone(), name.clone());
            name
        };

        let tagged = format!("[{doc_name}, p.{}]\n{}\n\n", seg.seg_page_idx, seg.content);
        if !context.is_empty() && context.len() + tagged.len() > context_max {
            break;
        }
        context.push_str(&tagged);
        sources.push(SourceRef {
            doc_id: seg.doc_id.clone(),
            doc_name,
            seg_id: seg.seg_id.clone(),
            page_idx: seg.seg_page_idx,
        });
        if context.len() >= context_max {
            break;
        }
    }

    (context, sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_length_is_validated() {
        let over = "x".repeat(MAX_QUERY_CHARS + 1);
        assert!(over.chars().count() > MAX_QUERY_CHARS);
    }

    #[tokio::test]
    async fn session_locks_serialize_same_session() {
        let locks = SessionLocks::new();
        let a = locks.get("s1");
        let b = locks.get("s1");
        assert!(Arc::ptr_eq(&a, &b));
        let c = locks.get("s2");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
