//! Public, resolved configuration types consumed by the rest of the crate.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub log_level: String,
    pub http: HttpConfig,
    pub metadata: MetadataConfig,
    pub vectorstore: VectorStoreConfig,
    pub lexical: LexicalConfig,
    pub model_gateway: ModelGatewayConfig,
    pub status_sync: StatusSyncConfig,
    pub retrieval: RetrievalConfig,
    pub chunker: ChunkerConfig,
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Path to the SQLite database backing the Metadata Store Adapter.
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub db_path: PathBuf,
    pub dim: usize,
}

#[derive(Debug, Clone)]
pub struct LexicalConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelGatewayConfig {
    pub provider: String,
    pub embed_base_url: String,
    pub rerank_base_url: String,
    pub generate_base_url: String,
    pub api_key: Option<String>,
    pub embed_model: String,
    pub rerank_model: String,
    pub generate_model: String,
    pub timeout_seconds: u64,
    pub max_concurrent_requests: usize,
    pub rate_limit_per_minute: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct StatusSyncConfig {
    pub callback_url: Option<String>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub candidate_k: usize,
    pub rerank_k: usize,
    pub alpha: f32,
    pub history_max: usize,
    pub context_max: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub emit_page_summary: bool,
}

/// Per-stage concurrency budgets for the ingestion pipeline, per spec §4.6's
/// backpressure requirement: Parse and Vectorize bottleneck on different
/// external resources and so get independent budgets.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub queue_capacity: usize,
    pub parse_concurrency: usize,
    pub vectorize_concurrency: usize,
    pub general_concurrency: usize,
    /// How long (seconds) a document may sit in a non-terminal state before
    /// it's considered stale and eligible for stage-restart on resume.
    pub resume_grace_period_secs: i64,
}

#[cfg(test)]
impl Config {
    /// Safe `Config` for unit tests — dummy model provider, local paths,
    /// no external calls.
    pub fn test_default(work_dir: &std::path::Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            http: HttpConfig {
                bind: "127.0.0.1:0".into(),
            },
            metadata: MetadataConfig {
                db_path: work_dir.join("metadata.sqlite3"),
            },
            vectorstore: VectorStoreConfig {
                db_path: work_dir.join("vectors.sqlite3"),
                dim: 8,
            },
            lexical: LexicalConfig {
                db_path: work_dir.join("lexical.sqlite3"),
            },
            model_gateway: ModelGatewayConfig {
                provider: "dummy".into(),
                embed_base_url: "http://localhost:0/embed".into(),
                rerank_base_url: "http://localhost:0/rerank".into(),
                generate_base_url: "http://localhost:0/generate".into(),
                api_key: None,
                embed_model: "test-embed".into(),
                rerank_model: "test-rerank".into(),
                generate_model: "test-generate".into(),
                timeout_seconds: 1,
                max_concurrent_requests: 2,
                rate_limit_per_minute: 6000,
                max_retries: 2,
            },
            status_sync: StatusSyncConfig {
                callback_url: None,
                worker_count: 1,
                queue_capacity: 16,
                max_retries: 2,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                candidate_k: 50,
                rerank_k: 20,
                alpha: 0.5,
                history_max: 10,
                context_max: 4000,
            },
            chunker: ChunkerConfig {
                emit_page_summary: false,
            },
            ingestion: IngestionConfig {
                queue_capacity: 64,
                parse_concurrency: 2,
                vectorize_concurrency: 2,
                general_concurrency: 4,
                resume_grace_period_secs: 300,
            },
        }
    }
}
