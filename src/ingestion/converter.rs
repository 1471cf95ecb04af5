//! Document→PDF converter contract (the Convert stage's external
//! collaborator). The real converter process is out of core per spec §1 —
//! only the contract consumed by the pipeline is specified here.

use std::path::Path;

use tracing::warn;

use crate::error::AppError;

/// Converts a source document (Word/Excel/PowerPoint/plain text/…) into a
/// PDF and returns the output PDF's path. Implementations that wrap a real
/// converter process should classify failures per spec §7 (Transient vs.
/// Permanent) before surfacing them as [`AppError::Ingestion`].
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, source_path: &str, extension: &str, output_dir: &str) -> Result<String, AppError>;
}

/// Reference/stub converter: a no-op when the source is already a PDF;
/// otherwise copies the source bytes verbatim into the output directory and
/// labels them as `.pdf`. This is a stand-in for an external office-to-PDF
/// converter (e.g. LibreOffice headless) — adequate for exercising the
/// pipeline's state machine and callback behavior without that dependency.
pub struct PassthroughConverter;

impl DocumentConverter for PassthroughConverter {
    fn convert(&self, source_path: &str, extension: &str, output_dir: &str) -> Result<String, AppError> {
        if extension.eq_ignore_ascii_case("pdf") {
            return Ok(source_path.to_string());
        }

        warn!(
            source_path,
            extension, "PassthroughConverter is a stand-in for an external office-to-PDF converter"
        );
        std::fs::create_dir_all(output_dir)
            .map_err(|e| AppError::Ingestion(format!("create output dir {output_dir}: {e}")))?;
        let dest = Path::new(output_dir).join("converted.pdf");
        std::fs::copy(source_path, &dest)
            .map_err(|e| AppError::Ingestion(format!("convert (copy stub) {source_path}: {e}")))?;
        Ok(dest.to_string_lossy().into_owned())
    }
}

/// Test double that always fails with a transient-style error, used to
/// exercise the `convert_failed` path.
#[cfg(test)]
pub struct FailingConverter;

#[cfg(test)]
impl DocumentConverter for FailingConverter {
    fn convert(&self, _source_path: &str, _extension: &str, _output_dir: &str) -> Result<String, AppError> {
        Err(AppError::Ingestion("simulated converter failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pdf_source_is_passed_through_unchanged() {
        let conv = PassthroughConverter;
        let out = conv.convert("/tmp/already.pdf", "pdf", "/tmp/out").unwrap();
        assert_eq!(out, "/tmp/already.pdf");
    }

    #[test]
    fn non_pdf_source_is_copied_and_relabeled() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("doc.docx");
        std::fs::write(&src, b"fake docx bytes").unwrap();
        let out_dir = dir.path().join("out");

        let conv = PassthroughConverter;
        let out = conv.convert(src.to_str().unwrap(), "docx", out_dir.to_str().unwrap()).unwrap();
        assert!(out.ends_with("converted.pdf"));
        assert!(Path::new(&out).exists());
    }
}
