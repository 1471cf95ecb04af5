//! `ragkb` — enterprise knowledge-base RAG question-answering service.
//!
//! The crate is organized as one module per component named in the design:
//! durable storage adapters (`metadata`, `vectorstore`, `lexical`), external
//! collaborators (`modelgateway`), the ingestion state machine (`chunker`,
//! `ingestion`), the query path (`retriever`, `orchestrator`), and the
//! ambient services that wire them together (`config`, `logger`, `runtime`,
//! `statussync`, `api`).

pub mod api;
pub mod chunker;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod lexical;
pub mod logger;
pub mod metadata;
pub mod modelgateway;
pub mod orchestrator;
pub mod retriever;
pub mod runtime;
pub mod statussync;
pub mod vectorstore;
