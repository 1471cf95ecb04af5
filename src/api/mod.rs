//! HTTP surface (outer surface) — axum endpoints for document ingestion
//! submission, hard deletion, and RAG chat, per spec §6.
//!
//! Mirrors the teacher's axum-channel pattern: a `Clone`-able state struct
//! injected via [`axum::extract::State`], a thin `build_router`, and
//! `axum::serve(...).with_graceful_shutdown(...)` wired to the shared
//! [`CancellationToken`]. Unlike the teacher's channel (which also serves a
//! UI backend), this surface is API-only.

mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::ingestion::IngestionHandle;
use crate::lexical::LexicalStore;
use crate::metadata::MetadataStore;
use crate::orchestrator::RagOrchestrator;
use crate::runtime::{Component, ComponentFuture};
use crate::vectorstore::VectorStore;

/// Shared state injected into every handler. Cheap to clone — every field is
/// reference-counted.
#[derive(Clone)]
pub(crate) struct AxumState {
    pub metadata: Arc<dyn MetadataStore>,
    pub vectorstore: Arc<dyn VectorStore>,
    pub lexical: Arc<dyn LexicalStore>,
    pub orchestrator: Arc<RagOrchestrator>,
    pub ingestion: IngestionHandle,
}

pub struct ApiServer {
    bind_addr: String,
    metadata: Arc<dyn MetadataStore>,
    vectorstore: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    orchestrator: Arc<RagOrchestrator>,
    ingestion: IngestionHandle,
}

impl ApiServer {
    pub fn new(
        bind_addr: impl Into<String>,
        metadata: Arc<dyn MetadataStore>,
        vectorstore: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        orchestrator: Arc<RagOrchestrator>,
        ingestion: IngestionHandle,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            metadata,
            vectorstore,
            lexical,
            orchestrator,
            ingestion,
        }
    }
}

impl Component for ApiServer {
    fn id(&self) -> &str {
        "api-server"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(
            self.bind_addr,
            self.metadata,
            self.vectorstore,
            self.lexical,
            self.orchestrator,
            self.ingestion,
            shutdown,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_axum(
    bind_addr: String,
    metadata: Arc<dyn MetadataStore>,
    vectorstore: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    orchestrator: Arc<RagOrchestrator>,
    ingestion: IngestionHandle,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let state = AxumState { metadata, vectorstore, lexical, orchestrator, ingestion };
    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Ingestion(format!("api bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "api server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Ingestion(format!("api server error: {e}")))?;

    info!("api server shut down");
    Ok(())
}

fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/documents", post(handlers::create_document))
        .route("/documents/{doc_id}", delete(handlers::delete_document))
        .route("/rag_chat", post(handlers::rag_chat))
        .with_state(state)
}
