//! `ragkb` — service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config (optional path as the first CLI argument)
//!   3. Init logger at the configured level
//!   4. Open the storage adapters (metadata, vector store, lexical store)
//!   5. Build the Model Gateway, Status Synchronizer, Ingestion Pipeline,
//!      Hybrid Retriever, and RAG Orchestrator
//!   6. Kick off the ingestion resume scan for documents left in flight by a
//!      prior crash
//!   7. Spawn every component and wait for Ctrl-C or a component failure

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use ragkb::api::ApiServer;
use ragkb::config;
use ragkb::error::AppError;
use ragkb::ingestion::converter::PassthroughConverter;
use ragkb::ingestion::parser::PlainTextParser;
use ragkb::ingestion::{self, IngestionPipeline};
use ragkb::lexical::{LexicalStore, SqliteLexicalStore};
use ragkb::logger;
use ragkb::metadata::{MetadataStore, SqliteMetadataStore};
use ragkb::modelgateway::ModelGateway;
use ragkb::orchestrator::RagOrchestrator;
use ragkb::retriever::HybridRetriever;
use ragkb::runtime::{self, Component};
use ragkb::statussync::StatusSynchronizer;
use ragkb::vectorstore::{SqliteVectorStore, VectorStore};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::args().nth(1);
    let config = config::load(config_path.as_deref())?;

    logger::init(&config.log_level, true, None)?;
    info!(
        work_dir = %config.work_dir.display(),
        log_level = %config.log_level,
        bind = %config.http.bind,
        "config loaded"
    );

    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(&config.metadata.db_path)?);
    let vectorstore: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::open(&config.vectorstore.db_path, config.vectorstore.dim)?);
    let lexical: Arc<dyn LexicalStore> = Arc::new(SqliteLexicalStore::open(&config.lexical.db_path)?);
    let gateway = Arc::new(ModelGateway::from_config(&config.model_gateway, config.vectorstore.dim));

    let (status_sync, status_handle) = StatusSynchronizer::new(&config.status_sync);

    let (pipeline, ingestion_handle) = IngestionPipeline::new(
        metadata.clone(),
        vectorstore.clone(),
        lexical.clone(),
        gateway.clone(),
        Arc::new(PassthroughConverter),
        Arc::new(PlainTextParser),
        status_handle,
        config.chunker.clone(),
        config.status_sync.callback_url.clone(),
        &config.ingestion,
    );
    ingestion::spawn_resume_scan(&pipeline, &ingestion_handle, config.ingestion.resume_grace_period_secs);

    let retriever = Arc::new(HybridRetriever::new(
        metadata.clone(),
        vectorstore.clone(),
        lexical.clone(),
        gateway.clone(),
        config.retrieval.clone(),
    ));
    let orchestrator = Arc::new(RagOrchestrator::new(
        metadata.clone(),
        retriever,
        gateway.clone(),
        config.retrieval.clone(),
    ));

    let api_server = ApiServer::new(
        config.http.bind.clone(),
        metadata.clone(),
        vectorstore.clone(),
        lexical.clone(),
        orchestrator,
        ingestion_handle,
    );

    let shutdown = CancellationToken::new();
    let components: Vec<Box<dyn Component>> =
        vec![Box::new(pipeline), Box::new(status_sync), Box::new(api_server)];
    let runtime_handle = runtime::spawn_components(components, shutdown.clone());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
            shutdown.cancel();
        }
        result = runtime_handle.join() => {
            return result;
        }
    }

    Ok(())
}
