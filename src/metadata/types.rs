//! Shared types for the Metadata Store Adapter — mirrors `doc_info`,
//! `segment_info`, `doc_page_info`, `permission_doc_link`, `chat_sessions`,
//! `chat_messages`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline state for a document, per the ingestion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    Converting,
    Parsing,
    Parsed,
    Merging,
    Merged,
    Chunking,
    Chunked,
    Vectorizing,
    Splited,
    ConvertFailed,
    ParseFailed,
    MergeFailed,
    ChunkFailed,
    SplitFailed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Converting => "converting",
            ProcessStatus::Parsing => "parsing",
            ProcessStatus::Parsed => "parsed",
            ProcessStatus::Merging => "merging",
            ProcessStatus::Merged => "merged",
            ProcessStatus::Chunking => "chunking",
            ProcessStatus::Chunked => "chunked",
            ProcessStatus::Vectorizing => "vectorizing",
            ProcessStatus::Splited => "splited",
            ProcessStatus::ConvertFailed => "convert_failed",
            ProcessStatus::ParseFailed => "parse_failed",
            ProcessStatus::MergeFailed => "merge_failed",
            ProcessStatus::ChunkFailed => "chunk_failed",
            ProcessStatus::SplitFailed => "split_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ProcessStatus::Pending,
            "converting" => ProcessStatus::Converting,
            "parsing" => ProcessStatus::Parsing,
            "parsed" => ProcessStatus::Parsed,
            "merging" => ProcessStatus::Merging,
            "merged" => ProcessStatus::Merged,
            "chunking" => ProcessStatus::Chunking,
            "chunked" => ProcessStatus::Chunked,
            "vectorizing" => ProcessStatus::Vectorizing,
            "splited" => ProcessStatus::Splited,
            "convert_failed" => ProcessStatus::ConvertFailed,
            "parse_failed" => ProcessStatus::ParseFailed,
            "merge_failed" => ProcessStatus::MergeFailed,
            "chunk_failed" => ProcessStatus::ChunkFailed,
            "split_failed" => ProcessStatus::SplitFailed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Splited
                | ProcessStatus::ConvertFailed
                | ProcessStatus::ParseFailed
                | ProcessStatus::MergeFailed
                | ProcessStatus::ChunkFailed
                | ProcessStatus::SplitFailed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProcessStatus::ConvertFailed
                | ProcessStatus::ParseFailed
                | ProcessStatus::MergeFailed
                | ProcessStatus::ChunkFailed
                | ProcessStatus::SplitFailed
        )
    }

    /// The stage-DAG adjacency: from `self`, which statuses are a legal next
    /// hop. `Pending` is reachable from any status via an explicit restart,
    /// handled separately in `MetadataStore::restart_document`.
    pub fn allowed_next(&self) -> &'static [ProcessStatus] {
        use ProcessStatus::*;
        match self {
            Pending => &[Converting, ConvertFailed],
            Converting => &[Parsing, ConvertFailed],
            Parsing => &[Parsed, ParseFailed],
            Parsed => &[Merging, MergeFailed],
            Merging => &[Merged, MergeFailed],
            Merged => &[Chunking, ChunkFailed],
            Chunking => &[Chunked, ChunkFailed],
            Chunked => &[Vectorizing, SplitFailed],
            Vectorizing => &[Splited, SplitFailed],
            Splited | ConvertFailed | ParseFailed | MergeFailed | ChunkFailed | SplitFailed => &[],
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub doc_id: String,
    pub display_name: String,
    pub extension: String,
    pub source_path: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub display_name: String,
    pub extension: String,
    pub source_path: String,
    pub output_dir: String,
    pub pdf_path: Option<String>,
    pub json_path: Option<String>,
    pub spans_path: Option<String>,
    pub layout_path: Option<String>,
    pub images_path: Option<String>,
    pub merged_path: Option<String>,
    pub process_status: ProcessStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Text,
    Table,
    Image,
    PageSummary,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Text => "text",
            SegmentType::Table => "table",
            SegmentType::Image => "image",
            SegmentType::PageSummary => "page_summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => SegmentType::Text,
            "table" => SegmentType::Table,
            "image" => SegmentType::Image,
            "page_summary" => SegmentType::PageSummary,
            _ => return None,
        })
    }

    /// Whether this segment type is carried into the vector/lexical indices.
    pub fn is_indexable(&self) -> bool {
        matches!(self, SegmentType::Text | SegmentType::Table | SegmentType::PageSummary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub seg_id: String,
    pub doc_id: String,
    pub seg_content: String,
    pub seg_image_path: Option<String>,
    pub seg_caption: Option<String>,
    pub seg_footnote: Option<String>,
    pub seg_len: i64,
    pub seg_type: SegmentType,
    pub seg_page_idx: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub doc_id: String,
    pub page_idx: i64,
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionLink {
    pub permission_type: String,
    /// Empty string means "unrestricted" for this document.
    pub subject_id: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Human,
    Ai,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Human => "human",
            MessageType::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "human" => MessageType::Human,
            "ai" => MessageType::Ai,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Option<MessageMetadata>,
    pub created_at: String,
}

/// Versioned, tagged metadata attached to a chat message — sources cited,
/// the rewritten query, token usage, latency, and any error. `version` gates
/// interpretation so older rows stay readable as the shape evolves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default = "default_metadata_version")]
    pub version: u32,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub rewritten_query: Option<String>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_metadata_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub doc_id: String,
    pub doc_name: String,
    pub seg_id: String,
    pub page_idx: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}
