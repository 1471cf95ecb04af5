//! SQLite-backed reference implementation of [`super::MetadataStore`].

use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::AppError;

use super::types::*;
use super::{ArtifactField, MetadataStore};

const SCHEMA_VERSION: i64 = 1;

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS doc_info (
            doc_id          TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            extension       TEXT NOT NULL,
            source_path     TEXT NOT NULL,
            output_dir      TEXT NOT NULL,
            pdf_path        TEXT,
            json_path       TEXT,
            spans_path      TEXT,
            layout_path     TEXT,
            images_path     TEXT,
            merged_path     TEXT,
            process_status  TEXT NOT NULL,
            error_message   TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS segment_info (
            seg_id          TEXT PRIMARY KEY,
            doc_id          TEXT NOT NULL REFERENCES doc_info(doc_id) ON DELETE CASCADE,
            seg_content     TEXT NOT NULL,
            seg_image_path  TEXT,
            seg_caption     TEXT,
            seg_footnote    TEXT,
            seg_len         INTEGER NOT NULL,
            seg_type        TEXT NOT NULL,
            seg_page_idx    INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_segment_info_doc_id ON segment_info(doc_id);

        CREATE TABLE IF NOT EXISTS doc_page_info (
            doc_id     TEXT NOT NULL REFERENCES doc_info(doc_id) ON DELETE CASCADE,
            page_idx   INTEGER NOT NULL,
            image_path TEXT NOT NULL,
            PRIMARY KEY (doc_id, page_idx)
        );

        CREATE TABLE IF NOT EXISTS permission_doc_link (
            permission_type TEXT NOT NULL,
            subject_id      TEXT NOT NULL DEFAULT '',
            doc_id          TEXT NOT NULL REFERENCES doc_info(doc_id) ON DELETE CASCADE,
            PRIMARY KEY (permission_type, subject_id, doc_id)
        );
        CREATE INDEX IF NOT EXISTS idx_permission_doc_id ON permission_doc_link(doc_id);
        CREATE INDEX IF NOT EXISTS idx_permission_subject ON permission_doc_link(subject_id);

        CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id   TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
            message_type TEXT NOT NULL,
            content      TEXT NOT NULL,
            metadata     TEXT,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, created_at, id);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| AppError::Metadata(format!("initialize schema: {e}")))
}

fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Metadata(format!("create db dir {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Metadata(format!("open {}: {e}", db_path.display())))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Metadata(format!("set journal_mode: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Metadata(format!("set foreign_keys: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Metadata(format!("set busy_timeout: {e}")))?;
    Ok(conn)
}

/// SQLite-backed metadata store. Holds a single connection behind a mutex —
/// adequate for the reference adapter; a higher-throughput deployment would
/// use a pool (e.g. `r2d2`) behind the same trait.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        let conn = open_conn(db_path)?;
        init_schema(&conn)?;
        let _ = SCHEMA_VERSION;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        let status_str: String = row.get("process_status")?;
        Ok(Document {
            doc_id: row.get("doc_id")?,
            display_name: row.get("display_name")?,
            extension: row.get("extension")?,
            source_path: row.get("source_path")?,
            output_dir: row.get("output_dir")?,
            pdf_path: row.get("pdf_path")?,
            json_path: row.get("json_path")?,
            spans_path: row.get("spans_path")?,
            layout_path: row.get("layout_path")?,
            images_path: row.get("images_path")?,
            merged_path: row.get("merged_path")?,
            process_status: ProcessStatus::parse(&status_str).unwrap_or(ProcessStatus::Pending),
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<Segment> {
        let seg_type: String = row.get("seg_type")?;
        Ok(Segment {
            seg_id: row.get("seg_id")?,
            doc_id: row.get("doc_id")?,
            seg_content: row.get("seg_content")?,
            seg_image_path: row.get("seg_image_path")?,
            seg_caption: row.get("seg_caption")?,
            seg_footnote: row.get("seg_footnote")?,
            seg_len: row.get("seg_len")?,
            seg_type: SegmentType::parse(&seg_type).unwrap_or(SegmentType::Text),
            seg_page_idx: row.get("seg_page_idx")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn create_document(&self, meta: NewDocument) -> Result<String, AppError> {
        let conn = self.lock();
        let existing_status: Option<String> = conn
            .query_row(
                "SELECT process_status FROM doc_info WHERE doc_id = ?1",
                params![meta.doc_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| AppError::Metadata(format!("create_document lookup: {e}")))?;

        if let Some(status_str) = &existing_status {
            let status = ProcessStatus::parse(status_str).unwrap_or(ProcessStatus::Pending);
            if !status.is_failure() {
                return Err(AppError::Duplicate(format!(
                    "document {} already exists in non-failure state {status}",
                    meta.doc_id
                )));
            }
        }

        let now = now_iso8601();
        conn.execute(
            "INSERT INTO doc_info
                (doc_id, display_name, extension, source_path, output_dir,
                 pdf_path, json_path, spans_path, layout_path, images_path, merged_path,
                 process_status, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, NULL, NULL, NULL, ?6, NULL, ?7, ?7)
             ON CONFLICT(doc_id) DO UPDATE SET
                display_name = excluded.display_name,
                extension = excluded.extension,
                source_path = excluded.source_path,
                output_dir = excluded.output_dir,
                pdf_path = NULL, json_path = NULL, spans_path = NULL,
                layout_path = NULL, images_path = NULL, merged_path = NULL,
                process_status = excluded.process_status,
                error_message = NULL,
                updated_at = excluded.updated_at",
            params![
                meta.doc_id,
                meta.display_name,
                meta.extension,
                meta.source_path,
                meta.output_dir,
                ProcessStatus::Pending.as_str(),
                now,
            ],
        )
        .map_err(|e| AppError::Metadata(format!("create_document insert: {e}")))?;

        Ok(meta.doc_id)
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<Document>, AppError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM doc_info WHERE doc_id = ?1",
            params![doc_id],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| AppError::Metadata(format!("get_document: {e}")))
    }

    fn update_status(
        &self,
        doc_id: &str,
        new_status: ProcessStatus,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        let conn = self.lock();
        let current_str: String = conn
            .query_row(
                "SELECT process_status FROM doc_info WHERE doc_id = ?1",
                params![doc_id],
                |r| r.get(0),
            )
            .map_err(|_| AppError::NotFound(format!("document {doc_id} not found")))?;
        let current = ProcessStatus::parse(&current_str).unwrap_or(ProcessStatus::Pending);

        if !current.allowed_next().contains(&new_status) {
            return Err(AppError::IllegalTransition(format!(
                "{doc_id}: {current} -> {new_status} is not permitted by the stage DAG"
            )));
        }

        conn.execute(
            "UPDATE doc_info SET process_status = ?1, error_message = ?2, updated_at = ?3 WHERE doc_id = ?4",
            params![new_status.as_str(), error_message, now_iso8601(), doc_id],
        )
        .map_err(|e| AppError::Metadata(format!("update_status: {e}")))?;

        Ok(())
    }

    fn restart_document(&self, doc_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE doc_info SET process_status = ?1, error_message = NULL, updated_at = ?2 WHERE doc_id = ?3",
                params![ProcessStatus::Pending.as_str(), now_iso8601(), doc_id],
            )
            .map_err(|e| AppError::Metadata(format!("restart_document: {e}")))?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("document {doc_id} not found")));
        }
        Ok(())
    }

    fn set_artifact_path(&self, doc_id: &str, field: ArtifactField, path: &str) -> Result<(), AppError> {
        let conn = self.lock();
        let sql = format!(
            "UPDATE doc_info SET {} = ?1, updated_at = ?2 WHERE doc_id = ?3",
            field.column()
        );
        let changed = conn
            .execute(&sql, params![path, now_iso8601(), doc_id])
            .map_err(|e| AppError::Metadata(format!("set_artifact_path: {e}")))?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("document {doc_id} not found")));
        }
        Ok(())
    }

    fn insert_pages_bulk(&self, doc_id: &str, pages: &[Page]) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Metadata(format!("insert_pages_bulk begin: {e}")))?;
        for page in pages {
            tx.execute(
                "INSERT OR REPLACE INTO doc_page_info (doc_id, page_idx, image_path) VALUES (?1, ?2, ?3)",
                params![doc_id, page.page_idx, page.image_path],
            )
            .map_err(|e| AppError::Metadata(format!("insert_pages_bulk: {e}")))?;
        }
        tx.commit()
            .map_err(|e| AppError::Metadata(format!("insert_pages_bulk commit: {e}")))?;
        Ok(())
    }

    fn insert_segments_bulk(&self, doc_id: &str, segments: &[Segment]) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Metadata(format!("insert_segments_bulk begin: {e}")))?;

        for seg in segments {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT seg_id FROM segment_info WHERE seg_id = ?1",
                    params![seg.seg_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| AppError::Metadata(format!("insert_segments_bulk lookup: {e}")))?;
            if existing.is_some() {
                return Err(AppError::Duplicate(format!(
                    "segment {} already exists",
                    seg.seg_id
                )));
            }
            tx.execute(
                "INSERT INTO segment_info
                    (seg_id, doc_id, seg_content, seg_image_path, seg_caption, seg_footnote,
                     seg_len, seg_type, seg_page_idx, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    seg.seg_id,
                    doc_id,
                    seg.seg_content,
                    seg.seg_image_path,
                    seg.seg_caption,
                    seg.seg_footnote,
                    seg.seg_len,
                    seg.seg_type.as_str(),
                    seg.seg_page_idx,
                    seg.created_at,
                ],
            )
            .map_err(|e| AppError::Metadata(format!("insert_segments_bulk insert: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Metadata(format!("insert_segments_bulk commit: {e}")))?;
        Ok(())
    }

    fn list_segments(&self, doc_id: &str) -> Result<Vec<Segment>, AppError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM segment_info WHERE doc_id = ?1 ORDER BY seg_page_idx, seg_id")
            .map_err(|e| AppError::Metadata(format!("list_segments prepare: {e}")))?;
        let rows = stmt
            .query_map(params![doc_id], Self::row_to_segment)
            .map_err(|e| AppError::Metadata(format!("list_segments query: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Metadata(format!("list_segments collect: {e}")))
    }

    fn get_segment(&self, seg_id: &str) -> Result<Option<Segment>, AppError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM segment_info WHERE seg_id = ?1",
            params![seg_id],
            Self::row_to_segment,
        )
        .optional()
        .map_err(|e| AppError::Metadata(format!("get_segment: {e}")))
    }

    fn delete_segments_by_doc(&self, doc_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute("DELETE FROM segment_info WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| AppError::Metadata(format!("delete_segments_by_doc: {e}")))?;
        Ok(())
    }

    fn delete_document(&self, doc_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute("DELETE FROM doc_info WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| AppError::Metadata(format!("delete_document: {e}")))?;
        Ok(())
    }

    fn add_permission(&self, link: PermissionLink) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO permission_doc_link (permission_type, subject_id, doc_id) VALUES (?1, ?2, ?3)",
            params![link.permission_type, link.subject_id, link.doc_id],
        )
        .map_err(|e| AppError::Metadata(format!("add_permission: {e}")))?;
        Ok(())
    }

    fn list_permissions(&self, doc_id: &str) -> Result<Vec<PermissionLink>, AppError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT permission_type, subject_id, doc_id FROM permission_doc_link WHERE doc_id = ?1")
            .map_err(|e| AppError::Metadata(format!("list_permissions prepare: {e}")))?;
        let rows = stmt
            .query_map(params![doc_id], |r| {
                Ok(PermissionLink {
                    permission_type: r.get(0)?,
                    subject_id: r.get(1)?,
                    doc_id: r.get(2)?,
                })
            })
            .map_err(|e| AppError::Metadata(format!("list_permissions query: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Metadata(format!("list_permissions collect: {e}")))
    }

    fn authorized_doc_ids(&self, subject_id: &str) -> Result<Vec<String>, AppError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT doc_id FROM permission_doc_link WHERE subject_id = ?1 OR subject_id = ''",
            )
            .map_err(|e| AppError::Metadata(format!("authorized_doc_ids prepare: {e}")))?;
        let rows = stmt
            .query_map(params![subject_id], |r| r.get::<_, String>(0))
            .map_err(|e| AppError::Metadata(format!("authorized_doc_ids query: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Metadata(format!("authorized_doc_ids collect: {e}")))
    }

    fn create_session(&self, session_id: &str) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions (session_id, created_at) VALUES (?1, ?2)",
            params![session_id, now_iso8601()],
        )
        .map_err(|e| AppError::Metadata(format!("create_session: {e}")))?;
        Ok(())
    }

    fn append_message(
        &self,
        session_id: &str,
        message_type: MessageType,
        content: &str,
        metadata: Option<&MessageMetadata>,
    ) -> Result<i64, AppError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions (session_id, created_at) VALUES (?1, ?2)",
            params![session_id, now_iso8601()],
        )
        .map_err(|e| AppError::Metadata(format!("append_message ensure session: {e}")))?;

        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Metadata(format!("append_message serialize metadata: {e}")))?;

        conn.execute(
            "INSERT INTO chat_messages (session_id, message_type, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, message_type.as_str(), content, metadata_json, now_iso8601()],
        )
        .map_err(|e| AppError::Metadata(format!("append_message insert: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    fn load_recent_messages(&self, session_id: &str, max_chars: usize) -> Result<Vec<ChatMessage>, AppError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, message_type, content, metadata, created_at
                 FROM chat_messages WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| AppError::Metadata(format!("load_recent_messages prepare: {e}")))?;

        let rows = stmt
            .query_map(params![session_id], |r| {
                let message_type: String = r.get("message_type")?;
                let metadata_json: Option<String> = r.get("metadata")?;
                Ok((
                    r.get::<_, i64>("id")?,
                    r.get::<_, String>("session_id")?,
                    message_type,
                    r.get::<_, String>("content")?,
                    metadata_json,
                    r.get::<_, String>("created_at")?,
                ))
            })
            .map_err(|e| AppError::Metadata(format!("load_recent_messages query: {e}")))?;

        let mut newest_first = Vec::new();
        let mut cumulative = 0usize;
        for row in rows {
            let (id, session_id, message_type, content, metadata_json, created_at) =
                row.map_err(|e| AppError::Metadata(format!("load_recent_messages row: {e}")))?;
            if cumulative + content.len() > max_chars && !newest_first.is_empty() {
                break;
            }
            cumulative += content.len();
            let metadata = metadata_json
                .map(|json| serde_json::from_str::<MessageMetadata>(&json))
                .transpose()
                .map_err(|e| AppError::Metadata(format!("load_recent_messages parse metadata: {e}")))?;
            newest_first.push(ChatMessage {
                id,
                session_id,
                message_type: MessageType::parse(&message_type).unwrap_or(MessageType::Human),
                content,
                metadata,
                created_at,
            });
            if cumulative > max_chars {
                break;
            }
        }

        newest_first.reverse();
        Ok(newest_first)
    }

    fn find_stale_in_flight(&self, grace_period_secs: i64) -> Result<Vec<Document>, AppError> {
        let conn = self.lock();
        let cutoff = (Utc::now() - chrono::Duration::seconds(grace_period_secs))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let terminal: Vec<&str> = [
            ProcessStatus::Splited,
            ProcessStatus::ConvertFailed,
            ProcessStatus::ParseFailed,
            ProcessStatus::MergeFailed,
            ProcessStatus::ChunkFailed,
            ProcessStatus::SplitFailed,
        ]
        .iter()
        .map(|s| s.as_str())
        .collect();
        let placeholders = terminal.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT * FROM doc_info WHERE updated_at < ? AND process_status NOT IN ({placeholders})"
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Metadata(format!("find_stale_in_flight prepare: {e}")))?;

        let mut param_values: Vec<&dyn rusqlite::ToSql> = vec![&cutoff];
        for t in &terminal {
            param_values.push(t);
        }

        let rows = stmt
            .query_map(param_values.as_slice(), Self::row_to_document)
            .map_err(|e| AppError::Metadata(format!("find_stale_in_flight query: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Metadata(format!("find_stale_in_flight collect: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteMetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteMetadataStore::open(&dir.path().join("metadata.sqlite3")).unwrap();
        (dir, store)
    }

    fn new_doc(doc_id: &str) -> NewDocument {
        NewDocument {
            doc_id: doc_id.to_string(),
            display_name: "report.pdf".to_string(),
            extension: "pdf".to_string(),
            source_path: "/tmp/report.pdf".to_string(),
            output_dir: "/tmp/out".to_string(),
        }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        let doc = store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.process_status, ProcessStatus::Pending);
        assert_eq!(doc.display_name, "report.pdf");
    }

    #[test]
    fn duplicate_non_failure_rejected() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        let err = store.create_document(new_doc("d1")).unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[test]
    fn reupload_after_failure_succeeds() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store.update_status("d1", ProcessStatus::Converting, None).unwrap();
        store
            .update_status("d1", ProcessStatus::ConvertFailed, Some("boom"))
            .unwrap();
        store.create_document(new_doc("d1")).unwrap();
        let doc = store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.process_status, ProcessStatus::Pending);
        assert!(doc.error_message.is_none());
    }

    #[test]
    fn status_transitions_follow_dag() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store.update_status("d1", ProcessStatus::Converting, None).unwrap();
        let err = store
            .update_status("d1", ProcessStatus::Splited, None)
            .unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition(_)));
    }

    #[test]
    fn restart_resets_to_pending() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store.update_status("d1", ProcessStatus::Converting, None).unwrap();
        store
            .update_status("d1", ProcessStatus::ConvertFailed, Some("x"))
            .unwrap();
        store.restart_document("d1").unwrap();
        let doc = store.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.process_status, ProcessStatus::Pending);
        assert!(doc.error_message.is_none());
    }

    fn seg(doc_id: &str, seg_id: &str) -> Segment {
        Segment {
            seg_id: seg_id.to_string(),
            doc_id: doc_id.to_string(),
            seg_content: "hello world".to_string(),
            seg_image_path: None,
            seg_caption: None,
            seg_footnote: None,
            seg_len: 11,
            seg_type: SegmentType::Text,
            seg_page_idx: 1,
            created_at: now_iso8601(),
        }
    }

    #[test]
    fn insert_segments_bulk_is_all_or_nothing() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        let segs = vec![seg("d1", "s1"), seg("d1", "s1")];
        let err = store.insert_segments_bulk("d1", &segs).unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
        assert!(store.list_segments("d1").unwrap().is_empty());
    }

    #[test]
    fn delete_segments_by_doc_clears_segments_but_keeps_document() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store.insert_segments_bulk("d1", &[seg("d1", "s1")]).unwrap();
        store.delete_segments_by_doc("d1").unwrap();
        assert!(store.list_segments("d1").unwrap().is_empty());
        assert!(store.get_document("d1").unwrap().is_some());
        // re-chunking after the clear must not hit the duplicate guard.
        store.insert_segments_bulk("d1", &[seg("d1", "s1")]).unwrap();
    }

    #[test]
    fn delete_document_cascades_segments() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store
            .insert_segments_bulk("d1", &[seg("d1", "s1"), seg("d1", "s2")])
            .unwrap();
        store.delete_document("d1").unwrap();
        assert!(store.list_segments("d1").unwrap().is_empty());
        assert!(store.get_segment("s1").unwrap().is_none());
    }

    #[test]
    fn permission_soundness_unrestricted_and_subject() {
        let (_dir, store) = open_store();
        store.create_document(new_doc("d1")).unwrap();
        store.create_document(new_doc("d2")).unwrap();
        store
            .add_permission(PermissionLink {
                permission_type: "read".into(),
                subject_id: "s1".into(),
                doc_id: "d1".into(),
            })
            .unwrap();
        store
            .add_permission(PermissionLink {
                permission_type: "read".into(),
                subject_id: "".into(),
                doc_id: "d2".into(),
            })
            .unwrap();

        let mut s1_docs = store.authorized_doc_ids("s1").unwrap();
        s1_docs.sort();
        assert_eq!(s1_docs, vec!["d1".to_string(), "d2".to_string()]);

        let s2_docs = store.authorized_doc_ids("s2").unwrap();
        assert_eq!(s2_docs, vec!["d2".to_string()]);
    }

    #[test]
    fn message_ordering_and_char_budget() {
        let (_dir, store) = open_store();
        store.create_session("sess1").unwrap();
        store
            .append_message("sess1", MessageType::Human, "short", None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store
            .append_message("sess1", MessageType::Ai, "a longer reply here", None)
            .unwrap();

        let all = store.load_recent_messages("sess1", 1000).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "short");
        assert_eq!(all[1].content, "a longer reply here");

        let budgeted = store.load_recent_messages("sess1", 5).unwrap();
        assert_eq!(budgeted.len(), 1);
        assert_eq!(budgeted[0].content, "a longer reply here");
    }
}
