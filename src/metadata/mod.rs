//! Metadata Store Adapter (component A) — durable per-document/segment/
//! permission/session records behind a transactional SQL backend.
//!
//! [`MetadataStore`] is the trait boundary the rest of the crate depends on.
//! [`SqliteMetadataStore`] is the reference implementation; a production
//! deployment could swap in a MySQL-backed adapter behind the same trait
//! without touching `ingestion`, `retriever`, or `orchestrator`.
//!
//! Methods are synchronous (rusqlite is blocking). Callers in async contexts
//! dispatch through `tokio::task::spawn_blocking`, matching the teacher's
//! `SessionHandle` convention over its own sync `Store` trait.

mod sqlite;
mod types;

pub use sqlite::SqliteMetadataStore;
pub use types::*;

use crate::error::AppError;

/// CRUD and transactional contract over documents, segments, pages,
/// permissions, sessions, and messages, per spec §4.1.
pub trait MetadataStore: Send + Sync {
    /// Insert a new document row. Fails with `Duplicate` if `doc_id` already
    /// exists and is not in a failure state; otherwise overwrites derived
    /// paths and resets to `pending`.
    fn create_document(&self, meta: NewDocument) -> Result<String, AppError>;

    fn get_document(&self, doc_id: &str) -> Result<Option<Document>, AppError>;

    /// Atomic status transition. Rejects transitions not permitted by the
    /// stage DAG with `IllegalTransition`, leaving the row untouched.
    fn update_status(
        &self,
        doc_id: &str,
        new_status: ProcessStatus,
        error_message: Option<&str>,
    ) -> Result<(), AppError>;

    /// Reset a document to `pending`, clearing `error_message`. The only
    /// permitted backward transition.
    fn restart_document(&self, doc_id: &str) -> Result<(), AppError>;

    /// Persist a derived-artifact path (pdf/json/spans/layout/images/merged).
    fn set_artifact_path(&self, doc_id: &str, field: ArtifactField, path: &str) -> Result<(), AppError>;

    fn insert_pages_bulk(&self, doc_id: &str, pages: &[Page]) -> Result<(), AppError>;

    /// All-or-nothing insert within a single transaction. Duplicate `seg_id`
    /// within the batch or against existing rows fails the whole batch with
    /// `Duplicate`.
    fn insert_segments_bulk(&self, doc_id: &str, segments: &[Segment]) -> Result<(), AppError>;

    fn list_segments(&self, doc_id: &str) -> Result<Vec<Segment>, AppError>;

    fn get_segment(&self, seg_id: &str) -> Result<Option<Segment>, AppError>;

    /// Remove all segments for `doc_id`, leaving the document row itself
    /// intact. Used by the Chunk stage to clear a partial batch left behind
    /// by a crash before re-chunking on resume.
    fn delete_segments_by_doc(&self, doc_id: &str) -> Result<(), AppError>;

    /// Hard-delete a document and cascade to segments, pages, and
    /// permission links.
    fn delete_document(&self, doc_id: &str) -> Result<(), AppError>;

    fn add_permission(&self, link: PermissionLink) -> Result<(), AppError>;

    fn list_permissions(&self, doc_id: &str) -> Result<Vec<PermissionLink>, AppError>;

    /// Documents `subject_id` may read: rows matching `subject_id` plus any
    /// "unrestricted" (empty `subject_id`) row.
    fn authorized_doc_ids(&self, subject_id: &str) -> Result<Vec<String>, AppError>;

    fn create_session(&self, session_id: &str) -> Result<(), AppError>;

    /// Append a message, serializing `metadata` to JSON. Returns the
    /// inserted row's monotonic id.
    fn append_message(
        &self,
        session_id: &str,
        message_type: MessageType,
        content: &str,
        metadata: Option<&MessageMetadata>,
    ) -> Result<i64, AppError>;

    /// Newest-first messages for `session_id` until the cumulative character
    /// count would exceed `max_chars`, then reversed back to chronological
    /// order. Strict total ordering by `created_at` then insertion id.
    fn load_recent_messages(&self, session_id: &str, max_chars: usize) -> Result<Vec<ChatMessage>, AppError>;

    /// Documents in a non-terminal state whose `updated_at` is older than
    /// `grace_period_secs` — candidates for stage-restart on process resume.
    fn find_stale_in_flight(&self, grace_period_secs: i64) -> Result<Vec<Document>, AppError>;
}

/// Which derived-artifact path column a stage is recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactField {
    Pdf,
    Json,
    Spans,
    Layout,
    Images,
    Merged,
}

impl ArtifactField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            ArtifactField::Pdf => "pdf_path",
            ArtifactField::Json => "json_path",
            ArtifactField::Spans => "spans_path",
            ArtifactField::Layout => "layout_path",
            ArtifactField::Images => "images_path",
            ArtifactField::Merged => "merged_path",
        }
    }
}
