//! Raw TOML deserialization types. Mirror the on-disk file shape and carry
//! serde defaults; kept private to this module — [`super::load`] resolves
//! these into the public [`super::types::Config`].

use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub service: RawService,
    #[serde(default)]
    pub http: RawHttp,
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub vectorstore: RawVectorStore,
    #[serde(default)]
    pub lexical: RawLexical,
    #[serde(default)]
    pub model_gateway: RawModelGateway,
    #[serde(default)]
    pub status_sync: RawStatusSync,
    #[serde(default)]
    pub retrieval: RawRetrieval,
    #[serde(default)]
    pub chunker: RawChunker,
    #[serde(default)]
    pub ingestion: RawIngestion,
}

#[derive(Debug, Deserialize)]
pub struct RawService {
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_level: default_log_level(),
        }
    }
}

pub fn default_work_dir() -> String {
    "~/.ragkb".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RawHttp {
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
        }
    }
}

pub fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct RawMetadata {
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawVectorStore {
    pub db_path: Option<String>,
    #[serde(default = "default_vector_dim")]
    pub dim: usize,
}

impl Default for RawVectorStore {
    fn default() -> Self {
        Self {
            db_path: None,
            dim: default_vector_dim(),
        }
    }
}

pub fn default_vector_dim() -> usize {
    768
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLexical {
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawModelGateway {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub embed_base_url: String,
    #[serde(default)]
    pub rerank_base_url: String,
    #[serde(default)]
    pub generate_base_url: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    #[serde(default = "default_generate_model")]
    pub generate_model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RawModelGateway {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            embed_base_url: String::new(),
            rerank_base_url: String::new(),
            generate_base_url: String::new(),
            embed_model: default_embed_model(),
            rerank_model: default_rerank_model(),
            generate_model: default_generate_model(),
            timeout_seconds: default_timeout_seconds(),
            max_concurrent_requests: default_max_concurrent_requests(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            max_retries: default_max_retries(),
        }
    }
}

pub fn default_provider() -> String {
    "dummy".to_string()
}
pub fn default_embed_model() -> String {
    "text-embedding".to_string()
}
pub fn default_rerank_model() -> String {
    "rerank".to_string()
}
pub fn default_generate_model() -> String {
    "gpt-4o-mini".to_string()
}
pub fn default_timeout_seconds() -> u64 {
    60
}
pub fn default_max_concurrent_requests() -> usize {
    8
}
pub fn default_rate_limit_per_minute() -> u32 {
    600
}
pub fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub struct RawStatusSync {
    pub callback_url: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RawStatusSync {
    fn default() -> Self {
        Self {
            callback_url: None,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
        }
    }
}

pub fn default_worker_count() -> usize {
    2
}
pub fn default_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize)]
pub struct RawRetrieval {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_rerank_k")]
    pub rerank_k: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_history_max")]
    pub history_max: usize,
    #[serde(default = "default_context_max")]
    pub context_max: usize,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            rerank_k: default_rerank_k(),
            alpha: default_alpha(),
            history_max: default_history_max(),
            context_max: default_context_max(),
        }
    }
}

pub fn default_top_k() -> usize {
    5
}
pub fn default_candidate_k() -> usize {
    100
}
pub fn default_rerank_k() -> usize {
    20
}
pub fn default_alpha() -> f32 {
    0.5
}
pub fn default_history_max() -> usize {
    10
}
pub fn default_context_max() -> usize {
    4000
}

#[derive(Debug, Deserialize, Default)]
pub struct RawChunker {
    #[serde(default)]
    pub emit_page_summary: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawIngestion {
    #[serde(default = "default_ingestion_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,
    #[serde(default = "default_vectorize_concurrency")]
    pub vectorize_concurrency: usize,
    #[serde(default = "default_general_concurrency")]
    pub general_concurrency: usize,
    #[serde(default = "default_resume_grace_period_secs")]
    pub resume_grace_period_secs: i64,
}

impl Default for RawIngestion {
    fn default() -> Self {
        Self {
            queue_capacity: default_ingestion_queue_capacity(),
            parse_concurrency: default_parse_concurrency(),
            vectorize_concurrency: default_vectorize_concurrency(),
            general_concurrency: default_general_concurrency(),
            resume_grace_period_secs: default_resume_grace_period_secs(),
        }
    }
}

pub fn default_ingestion_queue_capacity() -> usize {
    256
}
pub fn default_parse_concurrency() -> usize {
    4
}
pub fn default_vectorize_concurrency() -> usize {
    4
}
pub fn default_general_concurrency() -> usize {
    8
}
pub fn default_resume_grace_period_secs() -> i64 {
    600
}
