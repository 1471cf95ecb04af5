//! Ingestion Pipeline (component F) — the stage scheduler that drives a
//! document through Convert → Parse → Merge → Chunk → Vectorize, per spec
//! §4.6.
//!
//! The five named stages collapse into four executable units: Convert and
//! Parse share one unit because the stage DAG chains `Converting` straight
//! into `Parsing` with no resting state in between (a document that crashes
//! mid-parse restarts the conversion too, which is cheap and idempotent for
//! every converter/parser pairing this crate ships). Each unit acquires a
//! per-stage semaphore before doing its work, so Parse and Vectorize — the
//! two stages that call out to external services — get independent
//! concurrency budgets from the rest, matching `IngestionConfig`.
//!
//! Resume-on-restart walks `find_stale_in_flight` once at startup and
//! re-submits every candidate; because every stage is idempotent on its
//! output (same `seg_id`s, same artifact paths), re-running a stage from its
//! start is indistinguishable from running it the first time.

pub mod converter;
pub mod merge;
pub mod parser;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunker;
use crate::config::{ChunkerConfig, IngestionConfig};
use crate::error::AppError;
use crate::lexical::{LexicalRecord, LexicalStore};
use crate::metadata::{Document, MetadataStore, ProcessStatus, Segment, SegmentType};
use crate::modelgateway::ModelGateway;
use crate::runtime::{Component, ComponentFuture};
use crate::statussync::StatusSyncHandle;
use crate::vectorstore::{VectorRecord, VectorStore};

use converter::DocumentConverter;
use parser::StructuralParser;

/// The four executable units the nine `ProcessStatus` values collapse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ConvertParse,
    Merge,
    Chunk,
    Vectorize,
}

/// Which stage would act on a document currently sitting in `status`.
/// `None` means the document is in a terminal state (success or failure)
/// and the scheduler has nothing left to do with it.
fn stage_for(status: ProcessStatus) -> Option<Stage> {
    use ProcessStatus::*;
    match status {
        Pending | Converting | Parsing => Some(Stage::ConvertParse),
        Parsed | Merging => Some(Stage::Merge),
        Merged | Chunking => Some(Stage::Chunk),
        Chunked | Vectorizing => Some(Stage::Vectorize),
        Splited | ConvertFailed | ParseFailed | MergeFailed | ChunkFailed | SplitFailed => None,
    }
}

/// Everything a running stage needs, shared across every in-flight document.
struct PipelineDeps {
    metadata: Arc<dyn MetadataStore>,
    vectorstore: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    gateway: Arc<ModelGateway>,
    converter: Arc<dyn DocumentConverter>,
    parser: Arc<dyn StructuralParser>,
    status_sync: StatusSyncHandle,
    chunker_cfg: ChunkerConfig,
    callback_url: String,
    parse_sem: Arc<Semaphore>,
    general_sem: Arc<Semaphore>,
    vectorize_sem: Arc<Semaphore>,
}

/// A handle used by the outer-surface (HTTP) layer to enqueue a document for
/// processing. Cheaply cloneable.
#[derive(Clone)]
pub struct IngestionHandle {
    tx: mpsc::Sender<String>,
}

impl IngestionHandle {
    /// Enqueue `doc_id` for processing, starting from whatever status it is
    /// currently in. Returns `Conflict` if the queue is saturated — the
    /// caller (the HTTP handler) surfaces that as backpressure rather than
    /// blocking the request indefinitely.
    pub fn submit(&self, doc_id: impl Into<String>) -> Result<(), AppError> {
        self.tx
            .try_send(doc_id.into())
            .map_err(|_| AppError::Conflict("ingestion queue is full, try again shortly".to_string()))
    }
}

/// The scheduler [`Component`]: receives doc_ids off a bounded channel and
/// drives each one through its remaining stages on an independently spawned
/// task, so one slow document never head-of-line blocks another.
pub struct IngestionPipeline {
    rx: Option<mpsc::Receiver<String>>,
    deps: Arc<PipelineDeps>,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectorstore: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        gateway: Arc<ModelGateway>,
        converter: Arc<dyn DocumentConverter>,
        parser: Arc<dyn StructuralParser>,
        status_sync: StatusSyncHandle,
        chunker_cfg: ChunkerConfig,
        callback_url: Option<String>,
        cfg: &IngestionConfig,
    ) -> (Self, IngestionHandle) {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let deps = Arc::new(PipelineDeps {
            metadata,
            vectorstore,
            lexical,
            gateway,
            converter,
            parser,
            status_sync,
            chunker_cfg,
            callback_url: callback_url.unwrap_or_default(),
            parse_sem: Arc::new(Semaphore::new(cfg.parse_concurrency.max(1))),
            general_sem: Arc::new(Semaphore::new(cfg.general_concurrency.max(1))),
            vectorize_sem: Arc::new(Semaphore::new(cfg.vectorize_concurrency.max(1))),
        });
        (Self { rx: Some(rx), deps }, IngestionHandle { tx })
    }

    /// Re-submit every document whose `updated_at` is older than the
    /// configured grace period and which has not reached a terminal status —
    /// candidates left mid-stage by a prior crash. Called once at startup,
    /// before the channel loop begins draining live submissions.
    async fn resume_stale(deps: &Arc<PipelineDeps>, grace_period_secs: i64, tx: &mpsc::Sender<String>) {
        let metadata = deps.metadata.clone();
        let stale = tokio::task::spawn_blocking(move || metadata.find_stale_in_flight(grace_period_secs)).await;
        let stale = match stale {
            Ok(Ok(docs)) => docs,
            Ok(Err(e)) => {
                error!(error = %e, "resume scan failed, starting with no re-submissions");
                return;
            }
            Err(e) => {
                error!("resume scan task panicked: {e}");
                return;
            }
        };

        if stale.is_empty() {
            return;
        }
        info!(count = stale.len(), "resuming stale in-flight documents");
        for doc in stale {
            if let Err(e) = tx.try_send(doc.doc_id.clone()) {
                warn!(doc_id = %doc.doc_id, "failed to re-queue stale document on resume: {e}");
            }
        }
    }
}

impl Component for IngestionPipeline {
    fn id(&self) -> &str {
        "ingestion-pipeline"
    }

    fn run(mut self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let mut rx = self.rx.take().expect("IngestionPipeline.run called twice");
            let deps = self.deps;

            let mut tasks = tokio::task::JoinSet::new();

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    Some(doc_id) = rx.recv() => {
                        let deps = deps.clone();
                        let request_id = Uuid::new_v4().to_string();
                        tasks.spawn(async move {
                            run_document(deps, doc_id, request_id).await;
                        });
                    }
                    Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = res {
                            error!("document processing task panicked: {e}");
                        }
                    }
                }
            }

            debug!("ingestion pipeline shutting down, draining in-flight documents");
            while tasks.join_next().await.is_some() {}
            Ok(())
        })
    }
}

/// Drive one document through every stage it is still eligible for, looping
/// until it reaches a terminal status (success or failure) or the
/// in-progress status is no longer recognised (deleted mid-flight).
async fn run_document(deps: Arc<PipelineDeps>, doc_id: String, request_id: String) {
    loop {
        let doc = match fetch_document(&deps, &doc_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(%doc_id, "document no longer exists, stopping pipeline run");
                return;
            }
            Err(e) => {
                error!(%doc_id, error = %e, "failed to load document for pipeline run");
                return;
            }
        };

        let Some(stage) = stage_for(doc.process_status) else {
            return;
        };

        let outcome = match stage {
            Stage::ConvertParse => run_convert_parse(&deps, &doc).await,
            Stage::Merge => run_merge(&deps, &doc).await,
            Stage::Chunk => run_chunk(&deps, &doc).await,
            Stage::Vectorize => run_vectorize(&deps, &doc).await,
        };

        match outcome {
            Ok(new_status) => {
                deps.status_sync.notify(&doc_id, new_status, &request_id, &deps.callback_url);
                if new_status.is_terminal() {
                    return;
                }
            }
            Err(e) => {
                error!(%doc_id, stage = ?stage, error = %e, "ingestion stage failed");
                return;
            }
        }
    }
}

async fn fetch_document(deps: &Arc<PipelineDeps>, doc_id: &str) -> Result<Option<Document>, AppError> {
    let metadata = deps.metadata.clone();
    let doc_id = doc_id.to_string();
    tokio::task::spawn_blocking(move || metadata.get_document(&doc_id))
        .await
        .map_err(|e| AppError::Ingestion(format!("fetch_document task panicked: {e}")))?
}

async fn set_status(
    deps: &Arc<PipelineDeps>,
    doc_id: &str,
    status: ProcessStatus,
    error_message: Option<&str>,
) -> Result<(), AppError> {
    let metadata = deps.metadata.clone();
    let doc_id = doc_id.to_string();
    let error_message = error_message.map(|s| s.to_string());
    tokio::task::spawn_blocking(move || metadata.update_status(&doc_id, status, error_message.as_deref()))
        .await
        .map_err(|e| AppError::Ingestion(format!("set_status task panicked: {e}")))?
}

/// Fail the document, recording `message` on the row, and return the
/// `Err` the caller should propagate. Isolated so every stage reports
/// failures the same way.
async fn fail(
    deps: &Arc<PipelineDeps>,
    doc_id: &str,
    failure_status: ProcessStatus,
    message: String,
) -> Result<ProcessStatus, AppError> {
    if let Err(e) = set_status(deps, doc_id, failure_status, Some(&message)).await {
        error!(%doc_id, error = %e, "failed to record failure status");
    }
    Err(AppError::StageFailed { stage: failure_status, message })
}

/// Convert (if needed) then structurally parse the document, in one
/// semaphore-gated unit. On success the document lands in `Parsed`,
/// skipping over the `Converting`/`Parsing` in-progress statuses entirely
/// from the caller's point of view — those are only ever visible to a
/// concurrent reader via `get_document` mid-flight.
async fn run_convert_parse(deps: &Arc<PipelineDeps>, doc: &Document) -> Result<ProcessStatus, AppError> {
    let _permit = deps.parse_sem.acquire().await.expect("parse semaphore closed");

    // A document resumed mid-stage is already sitting in `Converting` or
    // `Parsing` — re-entering that same status would be an illegal
    // self-transition, so only cross into it from `Pending`. If conversion
    // had already finished before the crash (status is `Parsing`), its
    // output is already on the row; skip straight to parsing.
    let pdf_path = if doc.process_status == ProcessStatus::Parsing {
        doc.pdf_path
            .clone()
            .ok_or_else(|| AppError::Invariant(format!("{}: in parsing with no pdf_path recorded", doc.doc_id)))?
    } else {
        if doc.process_status != ProcessStatus::Converting {
            set_status(deps, &doc.doc_id, ProcessStatus::Converting, None).await?;
        }

        let converter = deps.converter.clone();
        let source_path = doc.source_path.clone();
        let extension = doc.extension.clone();
        let output_dir = doc.output_dir.clone();
        let convert_result =
            tokio::task::spawn_blocking(move || converter.convert(&source_path, &extension, &output_dir))
                .await
                .map_err(|e| AppError::Ingestion(format!("convert task panicked: {e}")))?;

        let pdf_path = match convert_result {
            Ok(path) => path,
            Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::ConvertFailed, e.to_string()).await,
        };
        set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Pdf, &pdf_path).await?;
        set_status(deps, &doc.doc_id, ProcessStatus::Parsing, None).await?;
        pdf_path
    };

    let parser = deps.parser.clone();
    let output_dir = doc.output_dir.clone();
    let parse_result = {
        let pdf_path = pdf_path.clone();
        tokio::task::spawn_blocking(move || parser.parse(&pdf_path, &output_dir))
            .await
            .map_err(|e| AppError::Ingestion(format!("parse task panicked: {e}")))?
    };

    let parsed = match parse_result {
        Ok(parsed) => parsed,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::ParseFailed, e.to_string()).await,
    };

    set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Json, &parsed.json_path).await?;
    set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Spans, &parsed.spans_path).await?;
    set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Layout, &parsed.layout_path).await?;
    set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Images, &parsed.images_path).await?;

    let pages = merge::page_rows(&doc.doc_id, &parsed);
    let metadata = deps.metadata.clone();
    let doc_id = doc.doc_id.clone();
    tokio::task::spawn_blocking(move || metadata.insert_pages_bulk(&doc_id, &pages))
        .await
        .map_err(|e| AppError::Ingestion(format!("insert_pages_bulk task panicked: {e}")))??;

    set_status(deps, &doc.doc_id, ProcessStatus::Parsed, None).await?;
    Ok(ProcessStatus::Parsed)
}

async fn set_artifact(
    deps: &Arc<PipelineDeps>,
    doc_id: &str,
    field: crate::metadata::ArtifactField,
    path: &str,
) -> Result<(), AppError> {
    let metadata = deps.metadata.clone();
    let doc_id = doc_id.to_string();
    let path = path.to_string();
    tokio::task::spawn_blocking(move || metadata.set_artifact_path(&doc_id, field, &path))
        .await
        .map_err(|e| AppError::Ingestion(format!("set_artifact_path task panicked: {e}")))?
}

/// Re-derive parsed blocks for a document that already finished conversion,
/// by re-running the (idempotent) parser against the persisted PDF path.
/// Used by every stage past Convert/Parse, which only persists artifact
/// paths and page rows, not the in-memory block stream itself.
async fn reparse(deps: &Arc<PipelineDeps>, doc: &Document) -> Result<parser::ParsedDocument, AppError> {
    let pdf_path = doc
        .pdf_path
        .clone()
        .ok_or_else(|| AppError::Invariant(format!("{}: reached merge/chunk with no pdf_path recorded", doc.doc_id)))?;
    let parser = deps.parser.clone();
    let output_dir = doc.output_dir.clone();
    tokio::task::spawn_blocking(move || parser.parse(&pdf_path, &output_dir))
        .await
        .map_err(|e| AppError::Ingestion(format!("reparse task panicked: {e}")))?
}

async fn run_merge(deps: &Arc<PipelineDeps>, doc: &Document) -> Result<ProcessStatus, AppError> {
    let _permit = deps.general_sem.acquire().await.expect("general semaphore closed");
    if doc.process_status != ProcessStatus::Merging {
        set_status(deps, &doc.doc_id, ProcessStatus::Merging, None).await?;
    }

    let parsed = match reparse(deps, doc).await {
        Ok(parsed) => parsed,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::MergeFailed, e.to_string()).await,
    };

    let pages = merge::group_by_page(&parsed);
    let rendered = merge::render_merged_artifact(&pages);
    let merged_path = format!("{}/merged.txt", doc.output_dir);
    if let Err(e) = std::fs::write(&merged_path, &rendered) {
        return fail(
            deps,
            &doc.doc_id,
            ProcessStatus::MergeFailed,
            format!("write merged artifact {merged_path}: {e}"),
        )
        .await;
    }
    set_artifact(deps, &doc.doc_id, crate::metadata::ArtifactField::Merged, &merged_path).await?;

    set_status(deps, &doc.doc_id, ProcessStatus::Merged, None).await?;
    Ok(ProcessStatus::Merged)
}

async fn run_chunk(deps: &Arc<PipelineDeps>, doc: &Document) -> Result<ProcessStatus, AppError> {
    let _permit = deps.general_sem.acquire().await.expect("general semaphore closed");
    if doc.process_status != ProcessStatus::Chunking {
        set_status(deps, &doc.doc_id, ProcessStatus::Chunking, None).await?;
    }

    let parsed = match reparse(deps, doc).await {
        Ok(parsed) => parsed,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::ChunkFailed, e.to_string()).await,
    };
    let pages = merge::group_by_page(&parsed);
    let emit_page_summary = deps.chunker_cfg.emit_page_summary;

    let doc_id = doc.doc_id.clone();
    let segments =
        tokio::task::spawn_blocking(move || chunker::chunk_document(&doc_id, &pages, emit_page_summary))
            .await
            .map_err(|e| AppError::Ingestion(format!("chunk task panicked: {e}")))?;

    if segments.is_empty() {
        return fail(
            deps,
            &doc.doc_id,
            ProcessStatus::ChunkFailed,
            "chunker produced zero segments".to_string(),
        )
        .await;
    }

    // Clear any partial batch a prior crash left behind — insert is
    // all-or-nothing and fails closed on a duplicate `seg_id`.
    let metadata = deps.metadata.clone();
    let doc_id = doc.doc_id.clone();
    tokio::task::spawn_blocking(move || metadata.delete_segments_by_doc(&doc_id))
        .await
        .map_err(|e| AppError::Ingestion(format!("delete_segments_by_doc task panicked: {e}")))??;

    let metadata = deps.metadata.clone();
    let doc_id = doc.doc_id.clone();
    let insert_result =
        tokio::task::spawn_blocking(move || metadata.insert_segments_bulk(&doc_id, &segments))
            .await
            .map_err(|e| AppError::Ingestion(format!("insert_segments_bulk task panicked: {e}")))?;
    if let Err(e) = insert_result {
        return fail(deps, &doc.doc_id, ProcessStatus::ChunkFailed, e.to_string()).await;
    }

    set_status(deps, &doc.doc_id, ProcessStatus::Chunked, None).await?;
    Ok(ProcessStatus::Chunked)
}

async fn run_vectorize(deps: &Arc<PipelineDeps>, doc: &Document) -> Result<ProcessStatus, AppError> {
    let _permit = deps.vectorize_sem.acquire().await.expect("vectorize semaphore closed");
    if doc.process_status != ProcessStatus::Vectorizing {
        set_status(deps, &doc.doc_id, ProcessStatus::Vectorizing, None).await?;
    }

    let metadata = deps.metadata.clone();
    let doc_id = doc.doc_id.clone();
    let all_segments = tokio::task::spawn_blocking(move || metadata.list_segments(&doc_id))
        .await
        .map_err(|e| AppError::Ingestion(format!("list_segments task panicked: {e}")))?;
    let all_segments = match all_segments {
        Ok(segments) => segments,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, e.to_string()).await,
    };

    let indexable: Vec<Segment> = all_segments.into_iter().filter(|s| s.seg_type.is_indexable()).collect();
    if indexable.is_empty() {
        return fail(
            deps,
            &doc.doc_id,
            ProcessStatus::SplitFailed,
            "no indexable segments survived chunking".to_string(),
        )
        .await;
    }

    let texts: Vec<String> = indexable
        .iter()
        .map(|s| segment_embedding_text(s))
        .collect();
    let embeddings = match deps.gateway.embed(&texts).await {
        Ok(embeddings) => embeddings,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, e.to_string()).await,
    };
    if embeddings.len() != indexable.len() {
        return fail(
            deps,
            &doc.doc_id,
            ProcessStatus::SplitFailed,
            format!(
                "embedding backend returned {} vectors for {} segments",
                embeddings.len(),
                indexable.len()
            ),
        )
        .await;
    }

    let vector_records: Vec<VectorRecord> = indexable
        .iter()
        .zip(embeddings.into_iter())
        .map(|(seg, embedding)| VectorRecord {
            seg_id: seg.seg_id.clone(),
            doc_id: seg.doc_id.clone(),
            seg_type: seg.seg_type,
            seg_page_idx: seg.seg_page_idx,
            embedding,
        })
        .collect();

    let vectorstore = deps.vectorstore.clone();
    let doc_id = doc.doc_id.clone();
    let upsert_result =
        tokio::task::spawn_blocking(move || vectorstore.upsert(&doc_id, &vector_records)).await;
    let upsert_result = match upsert_result {
        Ok(r) => r,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, format!("vector upsert task panicked: {e}")).await,
    };
    if let Err(e) = upsert_result {
        return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, e.to_string()).await;
    }

    let lexical_records: Vec<LexicalRecord> = indexable
        .iter()
        .map(|seg| LexicalRecord {
            seg_id: seg.seg_id.clone(),
            doc_id: seg.doc_id.clone(),
            seg_type: seg.seg_type,
            seg_page_idx: seg.seg_page_idx,
            content: segment_embedding_text(seg),
        })
        .collect();

    let lexical = deps.lexical.clone();
    let doc_id = doc.doc_id.clone();
    let index_result = tokio::task::spawn_blocking(move || lexical.index(&lexical_records)).await;
    let index_result = match index_result {
        Ok(r) => r,
        Err(e) => return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, format!("lexical index task panicked: {e}")).await,
    };
    if let Err(e) = index_result {
        // Partial vector write survives; clean it up so a future retry of
        // this document starts from a consistent pair of indices rather
        // than leaking dense-only rows.
        let vectorstore = deps.vectorstore.clone();
        let doc_id = doc.doc_id.clone();
        let _ = tokio::task::spawn_blocking(move || vectorstore.delete_by_doc(&doc_id)).await;
        return fail(deps, &doc.doc_id, ProcessStatus::SplitFailed, e.to_string()).await;
    }

    set_status(deps, &doc.doc_id, ProcessStatus::Splited, None).await?;
    Ok(ProcessStatus::Splited)
}

/// The text embedded and indexed for a segment: caption (if any) prefixed
/// onto content, so an image or table with a descriptive caption is
/// findable by caption terms as well as its own content.
fn segment_embedding_text(seg: &Segment) -> String {
    match (&seg.seg_caption, seg.seg_type) {
        (Some(caption), SegmentType::Image) | (Some(caption), SegmentType::Table) => {
            format!("{caption}\n{}", seg.seg_content)
        }
        _ => seg.seg_content.clone(),
    }
}

/// Spawn the pipeline's resume scan as a detached task so [`Component::run`]
/// doesn't delay startup of the rest of the service on it. Exposed for
/// `main` to call right after constructing the pipeline and its handle.
pub fn spawn_resume_scan(pipeline: &IngestionPipeline, handle: &IngestionHandle, grace_period_secs: i64) {
    let deps = pipeline.deps.clone();
    let tx = handle.tx.clone();
    tokio::spawn(async move {
        IngestionPipeline::resume_stale(&deps, grace_period_secs, &tx).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_dispatch_matches_the_stage_dag() {
        use ProcessStatus::*;
        assert_eq!(stage_for(Pending), Some(Stage::ConvertParse));
        assert_eq!(stage_for(Converting), Some(Stage::ConvertParse));
        assert_eq!(stage_for(Parsing), Some(Stage::ConvertParse));
        assert_eq!(stage_for(Parsed), Some(Stage::Merge));
        assert_eq!(stage_for(Merging), Some(Stage::Merge));
        assert_eq!(stage_for(Merged), Some(Stage::Chunk));
        assert_eq!(stage_for(Chunking), Some(Stage::Chunk));
        assert_eq!(stage_for(Chunked), Some(Stage::Vectorize));
        assert_eq!(stage_for(Vectorizing), Some(Stage::Vectorize));
        assert_eq!(stage_for(Splited), None);
        assert_eq!(stage_for(ConvertFailed), None);
        assert_eq!(stage_for(SplitFailed), None);
    }

    #[test]
    fn embedding_text_prefixes_caption_for_tables_and_images() {
        let mut seg = Segment {
            seg_id: "s1".into(),
            doc_id: "d1".into(),
            seg_content: "<table></table>".into(),
            seg_image_path: None,
            seg_caption: Some("Table 1: revenue".into()),
            seg_footnote: None,
            seg_len: 0,
            seg_type: SegmentType::Table,
            seg_page_idx: 1,
            created_at: String::new(),
        };
        assert!(segment_embedding_text(&seg).starts_with("Table 1: revenue"));

        seg.seg_type = SegmentType::Text;
        assert_eq!(segment_embedding_text(&seg), "<table></table>");
    }

    #[tokio::test]
    async fn submit_respects_queue_capacity() {
        use crate::config::IngestionConfig;
        use crate::lexical::SqliteLexicalStore;
        use crate::metadata::SqliteMetadataStore;
        use crate::modelgateway::ModelGateway;
        use crate::vectorstore::SqliteVectorStore;
        use converter::PassthroughConverter;
        use parser::PlainTextParser;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(&dir.path().join("m.sqlite3")).unwrap());
        let vectorstore: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 8).unwrap());
        let lexical: Arc<dyn LexicalStore> =
            Arc::new(SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap());
        let gateway = Arc::new(ModelGateway::dummy_for_tests(8));
        let (status_sync, status_handle) = crate::statussync::StatusSynchronizer::new(&crate::config::StatusSyncConfig {
            callback_url: None,
            worker_count: 1,
            queue_capacity: 4,
            max_retries: 1,
        });
        drop(status_sync);

        let cfg = IngestionConfig {
            queue_capacity: 1,
            parse_concurrency: 1,
            vectorize_concurrency: 1,
            general_concurrency: 1,
            resume_grace_period_secs: 300,
        };
        let (_pipeline, handle) = IngestionPipeline::new(
            metadata,
            vectorstore,
            lexical,
            gateway,
            Arc::new(PassthroughConverter),
            Arc::new(PlainTextParser),
            status_handle,
            ChunkerConfig { emit_page_summary: false },
            None,
            &cfg,
        );

        handle.submit("doc-1").unwrap();
        let err = handle.submit("doc-2").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn submitted_document_reaches_splited_end_to_end() {
        use crate::config::IngestionConfig;
        use crate::lexical::SqliteLexicalStore;
        use crate::metadata::{NewDocument, SqliteMetadataStore};
        use crate::modelgateway::ModelGateway;
        use crate::vectorstore::SqliteVectorStore;
        use converter::PassthroughConverter;
        use parser::PlainTextParser;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(&dir.path().join("m.sqlite3")).unwrap());
        let vectorstore: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&dir.path().join("v.sqlite3"), 8).unwrap());
        let lexical: Arc<dyn LexicalStore> =
            Arc::new(SqliteLexicalStore::open(&dir.path().join("l.sqlite3")).unwrap());
        let gateway = Arc::new(ModelGateway::dummy_for_tests(8));
        let (status_sync, status_handle) = crate::statussync::StatusSynchronizer::new(&crate::config::StatusSyncConfig {
            callback_url: None,
            worker_count: 1,
            queue_capacity: 4,
            max_retries: 1,
        });
        drop(status_sync);

        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&output_dir).unwrap();
        let source_path = dir.path().join("doc-1.pdf");
        std::fs::write(&source_path, "Quarterly update.\n\nRevenue grew twelve percent.").unwrap();

        metadata
            .create_document(NewDocument {
                doc_id: "doc-1".to_string(),
                display_name: "Quarterly Update".to_string(),
                extension: "pdf".to_string(),
                source_path: source_path.to_string_lossy().into_owned(),
                output_dir: output_dir.to_string_lossy().into_owned(),
            })
            .unwrap();

        let cfg = IngestionConfig {
            queue_capacity: 16,
            parse_concurrency: 2,
            vectorize_concurrency: 2,
            general_concurrency: 2,
            resume_grace_period_secs: 300,
        };
        let (pipeline, handle) = IngestionPipeline::new(
            metadata.clone(),
            vectorstore,
            lexical,
            gateway,
            Arc::new(PassthroughConverter),
            Arc::new(PlainTextParser),
            status_handle,
            ChunkerConfig { emit_page_summary: false },
            None,
            &cfg,
        );

        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let join = tokio::spawn(async move { Box::new(pipeline).run(run_shutdown).await });

        handle.submit("doc-1").unwrap();

        let mut doc = metadata.get_document("doc-1").unwrap().unwrap();
        for _ in 0..200 {
            if doc.process_status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            doc = metadata.get_document("doc-1").unwrap().unwrap();
        }

        assert_eq!(doc.process_status, ProcessStatus::Splited);
        assert_eq!(doc.error_message, None);

        let segments = metadata.list_segments("doc-1").unwrap();
        assert!(!segments.is_empty());

        shutdown.cancel();
        let _ = join.await;
    }
}
