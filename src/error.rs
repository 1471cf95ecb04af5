//! Application-wide error types.

use thiserror::Error;

use crate::metadata::ProcessStatus;

/// Failure classes a backend/provider call can raise, per the error
/// taxonomy: transient failures are retry-eligible, permanent ones are not.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("lexical store error: {0}")]
    Lexical(String),

    #[error("model gateway error: {0}")]
    ModelGateway(#[from] GatewayError),

    #[error("status sync error: {0}")]
    StatusSync(String),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("ingestion stage failed at {stage}: {message}")]
    StageFailed { stage: ProcessStatus, message: String },

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("illegal status transition: {0}")]
    IllegalTransition(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Stable numeric code surfaced on the HTTP boundary, per the external
    /// API contract's worked examples (spec §7: 1001 malformed params, 2001
    /// query too long, 3002 unsupported format, 3005 parse failed).
    /// Unmapped variants fall back to a generic internal code.
    pub fn code(&self) -> u32 {
        match self {
            AppError::Authorization(_) => 1002,
            AppError::NotFound(_) => 1003,
            AppError::Conflict(_) => 1004,
            AppError::Duplicate(_) => 1005,
            AppError::IllegalTransition(_) => 1006,
            // The only current producer of `Validation` is the orchestrator's
            // query-length guard — that is exactly the spec's "query too
            // long" example.
            AppError::Validation(_) => 2001,
            AppError::ModelGateway(GatewayError::Transient(_)) => 2002,
            AppError::ModelGateway(GatewayError::OverlongInput(_)) => 2003,
            AppError::UnsupportedFormat(_) => 3002,
            AppError::ModelGateway(GatewayError::Permanent(_)) => 3003,
            AppError::Metadata(_) | AppError::VectorStore(_) | AppError::Lexical(_) => 3004,
            AppError::StageFailed { stage: ProcessStatus::ConvertFailed, .. } => 3006,
            AppError::StageFailed { stage: ProcessStatus::ParseFailed, .. } => 3005,
            AppError::StageFailed { stage: ProcessStatus::MergeFailed, .. } => 3007,
            AppError::StageFailed { stage: ProcessStatus::ChunkFailed, .. } => 3008,
            AppError::StageFailed { stage: ProcessStatus::SplitFailed, .. } => 3009,
            AppError::StageFailed { .. } => 9002,
            AppError::Invariant(_) => 9001,
            _ => 9000,
        }
    }
}

/// Failure classes for the Model Gateway (embed/rerank/generate). `Transient`
/// is retry-eligible with backoff; `OverlongInput` is never retried;
/// `Permanent` is surfaced as-is.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("permanent backend failure: {0}")]
    Permanent(String),

    #[error("input exceeds model limit: {0}")]
    OverlongInput(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(!e.to_string().is_empty());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn gateway_error_codes() {
        let e = AppError::ModelGateway(GatewayError::Transient("timeout".into()));
        assert_eq!(e.code(), 2002);
        assert!(GatewayError::Transient("x".into()).is_retryable());
        assert!(!GatewayError::Permanent("x".into()).is_retryable());
        assert!(!GatewayError::OverlongInput("x".into()).is_retryable());
    }

    #[test]
    fn validation_code_matches_query_too_long_example() {
        // spec §7: "2001 query too long" — the orchestrator's MAX_QUERY_CHARS
        // guard is the only current producer of `Validation`.
        assert_eq!(AppError::Validation("bad".into()).code(), 2001);
        assert_eq!(AppError::Conflict("busy".into()).code(), 1004);
    }

    #[test]
    fn unsupported_format_code_matches_spec_example() {
        assert_eq!(AppError::UnsupportedFormat("xyz".into()).code(), 3002);
    }

    #[test]
    fn parse_failed_code_matches_spec_example() {
        assert_eq!(
            AppError::StageFailed { stage: ProcessStatus::ParseFailed, message: "x".into() }.code(),
            3005
        );
        assert_eq!(
            AppError::StageFailed { stage: ProcessStatus::ConvertFailed, message: "x".into() }.code(),
            3006
        );
    }
}
