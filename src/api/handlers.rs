//! Handlers for the document-submission, hard-delete, and RAG-chat
//! endpoints. Every body wraps its backend call in a timeout, matching the
//! teacher's `api.rs` pattern, and reports failures as a structured JSON
//! body carrying [`AppError::code`] alongside a human-readable message.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, GatewayError};
use crate::metadata::{NewDocument, PermissionLink, SourceRef};

use super::AxumState;

const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 30;
const MAX_CHAT_TIMEOUT_SECS: u64 = 300;
const DOCUMENT_SUBMIT_TIMEOUT_SECS: u64 = 10;
const DELETE_TIMEOUT_SECS: u64 = 15;
const HEALTH_TIMEOUT_SECS: u64 = 3;

/// Extensions the ingestion pipeline knows how to convert/parse, per spec §1
/// ("PDF/Word/Excel/PowerPoint/plain text").
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"];

fn json_error(err: &AppError) -> Json<serde_json::Value> {
    Json(json!({ "code": err.code(), "error": err.to_string() }))
}

/// Map an [`AppError`] to the HTTP status it should surface as, per the
/// error taxonomy in spec §7.
fn error_status(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
        AppError::Authorization(_) => StatusCode::FORBIDDEN,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) | AppError::Duplicate(_) | AppError::IllegalTransition(_) => StatusCode::CONFLICT,
        AppError::ModelGateway(GatewayError::OverlongInput(_)) => StatusCode::BAD_REQUEST,
        AppError::ModelGateway(_) => StatusCode::BAD_GATEWAY,
        AppError::Metadata(_) | AppError::VectorStore(_) | AppError::Lexical(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::Invariant(_) | AppError::StageFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: AppError) -> Response {
    (error_status(&err), json_error(&err)).into_response()
}

fn is_supported_extension(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_extension("pdf"));
        assert!(is_supported_extension("PDF"));
        assert!(is_supported_extension("docx"));
        assert!(is_supported_extension("txt"));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(!is_supported_extension("exe"));
        assert!(!is_supported_extension(""));
    }

    #[test]
    fn unsupported_format_error_maps_to_spec_code_and_bad_request() {
        let err = AppError::UnsupportedFormat("exe".to_string());
        assert_eq!(err.code(), 3002);
        assert_eq!(error_status(&err), StatusCode::BAD_REQUEST);
    }
}

// ── GET /health ───────────────────────────────────────────────────────────

/// Readiness probe: a cheap round-trip against the metadata store confirms
/// the backing database is reachable. Returns 503 rather than hanging if the
/// store call stalls or errors.
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let metadata = state.metadata.clone();
    let check = tokio::task::spawn_blocking(move || metadata.authorized_doc_ids("__health_check__"));

    match tokio::time::timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS), check).await {
        Ok(Ok(Ok(_))) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "health check query failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" }))).into_response()
        }
        Ok(Err(e)) => {
            warn!("health check task panicked: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" }))).into_response()
        }
        Err(_) => {
            warn!("health check timed out");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" }))).into_response()
        }
    }
}

// ── POST /documents ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct CreateDocumentRequest {
    doc_id: String,
    display_name: String,
    extension: String,
    source_path: String,
    output_dir: String,
    /// Subjects permitted to read this document. Empty means unrestricted —
    /// readable by any subject, per spec §4.1 permission semantics.
    #[serde(default)]
    subject_ids: Vec<String>,
}

#[derive(Serialize)]
struct CreateDocumentResponse {
    doc_id: String,
}

/// POST /documents — register a document referencing a server-local source
/// path, record its permission links, and enqueue it for asynchronous
/// ingestion. Responds 202 once the row and permission links are durable;
/// processing itself happens off-request on the ingestion pipeline.
pub(super) async fn create_document(
    State(state): State<AxumState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Response {
    if !is_supported_extension(&req.extension) {
        return error_response(AppError::UnsupportedFormat(format!(
            "'{}' is not a supported document extension",
            req.extension
        )));
    }

    let metadata = state.metadata.clone();
    let new_doc = NewDocument {
        doc_id: req.doc_id.clone(),
        display_name: req.display_name,
        extension: req.extension,
        source_path: req.source_path,
        output_dir: req.output_dir,
    };

    let create = tokio::task::spawn_blocking(move || metadata.create_document(new_doc));
    let created = match tokio::time::timeout(Duration::from_secs(DOCUMENT_SUBMIT_TIMEOUT_SECS), create).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return error_response(AppError::Metadata(format!("create_document task panicked: {e}"))),
        Err(_) => return error_response(AppError::Metadata("create_document timed out".to_string())),
    };
    let doc_id = match created {
        Ok(doc_id) => doc_id,
        Err(e) => {
            warn!(doc_id = %req.doc_id, error = %e, "document creation rejected");
            return error_response(e);
        }
    };

    let links = if req.subject_ids.is_empty() {
        vec![PermissionLink { permission_type: "read".to_string(), subject_id: String::new(), doc_id: doc_id.clone() }]
    } else {
        req.subject_ids
            .iter()
            .map(|subject_id| PermissionLink {
                permission_type: "read".to_string(),
                subject_id: subject_id.clone(),
                doc_id: doc_id.clone(),
            })
            .collect()
    };

    for link in links {
        let metadata = state.metadata.clone();
        let result = tokio::task::spawn_blocking(move || metadata.add_permission(link)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%doc_id, error = %e, "failed to record permission link");
                return error_response(e);
            }
            Err(e) => return error_response(AppError::Metadata(format!("add_permission task panicked: {e}"))),
        }
    }

    if let Err(e) = state.ingestion.submit(doc_id.clone()) {
        warn!(%doc_id, error = %e, "failed to enqueue document for ingestion");
        return error_response(e);
    }

    (StatusCode::ACCEPTED, Json(CreateDocumentResponse { doc_id })).into_response()
}

// ── DELETE /documents/{doc_id} ───────────────────────────────────────────

/// DELETE /documents/{doc_id} — hard delete. Cascades synchronously to the
/// vector store and lexical store in addition to the metadata store's own
/// segment/page/permission cascade, per spec §4.1 delete semantics; the
/// response only goes out once every backend has dropped the document.
pub(super) async fn delete_document(State(state): State<AxumState>, Path(doc_id): Path<String>) -> Response {
    let vectorstore = state.vectorstore.clone();
    let doc_id_for_vs = doc_id.clone();
    let vs_result = tokio::time::timeout(
        Duration::from_secs(DELETE_TIMEOUT_SECS),
        tokio::task::spawn_blocking(move || vectorstore.delete_by_doc(&doc_id_for_vs)),
    )
    .await;
    if let Err(e) = flatten_delete_result(vs_result, "vector store delete") {
        return error_response(e);
    }

    let lexical = state.lexical.clone();
    let doc_id_for_lex = doc_id.clone();
    let lex_result = tokio::time::timeout(
        Duration::from_secs(DELETE_TIMEOUT_SECS),
        tokio::task::spawn_blocking(move || lexical.delete_by_doc(&doc_id_for_lex)),
    )
    .await;
    if let Err(e) = flatten_delete_result(lex_result, "lexical store delete") {
        return error_response(e);
    }

    let metadata = state.metadata.clone();
    let doc_id_for_meta = doc_id.clone();
    let meta_result = tokio::time::timeout(
        Duration::from_secs(DELETE_TIMEOUT_SECS),
        tokio::task::spawn_blocking(move || metadata.delete_document(&doc_id_for_meta)),
    )
    .await;
    if let Err(e) = flatten_delete_result(meta_result, "metadata delete") {
        return error_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}

fn flatten_delete_result(
    result: Result<Result<Result<(), AppError>, tokio::task::JoinError>, tokio::time::error::Elapsed>,
    step: &str,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => {
            warn!(step, error = %e, "delete cascade step failed");
            Err(e)
        }
        Ok(Err(e)) => Err(AppError::Metadata(format!("{step} task panicked: {e}"))),
        Err(_) => Err(AppError::Metadata(format!("{step} timed out"))),
    }
}

// ── POST /rag_chat ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RagChatRequest {
    query: String,
    subject_id: String,
    session_id: Option<String>,
    timeout: Option<u64>,
}

#[derive(Serialize)]
struct RagChatResponse {
    answer: String,
    sources: Vec<SourceRef>,
    tokens_used: u32,
    processing_time_ms: u64,
}

/// POST /rag_chat — answer a question against the knowledge base, scoped to
/// `subject_id`'s permissions, continuing `session_id`'s conversation when
/// given. A fresh session id is minted (but not persisted until the first
/// turn lands) when the caller omits one.
pub(super) async fn rag_chat(State(state): State<AxumState>, Json(req): Json<RagChatRequest>) -> Response {
    let session_id = req.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let metadata = state.metadata.clone();
    let session_id_for_create = session_id.clone();
    let create_session = tokio::task::spawn_blocking(move || metadata.create_session(&session_id_for_create)).await;
    match create_session {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return error_response(e),
        Err(e) => return error_response(AppError::Metadata(format!("create_session task panicked: {e}"))),
    }

    let timeout_secs = req.timeout.unwrap_or(DEFAULT_CHAT_TIMEOUT_SECS).clamp(1, MAX_CHAT_TIMEOUT_SECS);
    let orchestrator = state.orchestrator.clone();
    let session_id_for_answer = session_id.clone();
    let subject_id = req.subject_id.clone();
    let query = req.query.clone();

    let answer = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        async move { orchestrator.answer(&session_id_for_answer, &subject_id, &query).await },
    )
    .await;

    match answer {
        Ok(Ok(result)) => (
            StatusCode::OK,
            Json(RagChatResponse {
                answer: result.answer,
                sources: result.sources,
                tokens_used: result.tokens_used,
                processing_time_ms: result.processing_time_ms,
            }),
        )
            .into_response(),
        Ok(Err(e)) => {
            warn!(%session_id, error = %e, "rag_chat failed");
            error_response(e)
        }
        Err(_) => {
            warn!(%session_id, timeout_secs, "rag_chat timed out");
            (StatusCode::GATEWAY_TIMEOUT, json_error(&AppError::Orchestrator("request timed out".to_string())))
                .into_response()
        }
    }
}
