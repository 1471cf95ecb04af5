//! Structural-extractor contract (the Parse stage's external collaborator).
//! The real PDF structural extractor (layout analysis, OCR, table
//! detection, …) is out of core per spec §1 — only the contract consumed by
//! the pipeline (ordered, page-tagged blocks plus derived-artifact paths)
//! is specified here.

use crate::chunker::BlockKind;
use crate::error::AppError;

/// One structural unit as emitted by the parser, already tagged with the
/// page it belongs to. The Merge stage groups these by `page_idx`.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub page_idx: i64,
    pub kind: BlockKind,
    pub content: String,
    pub image_path: Option<String>,
}

impl ParsedBlock {
    pub fn text(page_idx: i64, content: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Text, content: content.into(), image_path: None }
    }
    pub fn title(page_idx: i64, content: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Title, content: content.into(), image_path: None }
    }
    pub fn table(page_idx: i64, html: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Table, content: html.into(), image_path: None }
    }
    pub fn image(page_idx: i64, caption: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Image, content: caption.into(), image_path: Some(image_path.into()) }
    }
    pub fn caption(page_idx: i64, content: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Caption, content: content.into(), image_path: None }
    }
    pub fn footnote(page_idx: i64, content: impl Into<String>) -> Self {
        Self { page_idx, kind: BlockKind::Footnote, content: content.into(), image_path: None }
    }
}

/// The parser's full output for one document: derived-artifact paths plus
/// the ordered, page-tagged block stream and one rendered page image per
/// page (`doc_page_info`'s `image_path`).
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub json_path: String,
    pub spans_path: String,
    pub layout_path: String,
    pub images_path: String,
    pub blocks: Vec<ParsedBlock>,
    /// `(page_idx, rendered_page_image_path)`, one entry per page that has
    /// at least one block.
    pub page_images: Vec<(i64, String)>,
}

/// Structural Extractor Adapter contract, per spec §4.6 stage 2.
pub trait StructuralParser: Send + Sync {
    fn parse(&self, pdf_path: &str, output_dir: &str) -> Result<ParsedDocument, AppError>;
}

/// Reference/stub parser: reads the "PDF" as UTF-8 text (the
/// [`super::converter::PassthroughConverter`] stub never produces a real
/// PDF either, so this pairing is internally consistent for tests and for
/// exercising the pipeline end to end). Pages are split on form-feed
/// (`\x0c`); paragraphs within a page are split on blank lines and become
/// `Text` blocks. Adequate as a stand-in for a real layout-aware extractor.
pub struct PlainTextParser;

impl StructuralParser for PlainTextParser {
    fn parse(&self, pdf_path: &str, output_dir: &str) -> Result<ParsedDocument, AppError> {
        let raw = std::fs::read_to_string(pdf_path)
            .map_err(|e| AppError::Ingestion(format!("parse (read stub) {pdf_path}: {e}")))?;

        let mut blocks = Vec::new();
        let mut page_images = Vec::new();

        for (i, page_text) in raw.split('\u{000c}').enumerate() {
            let page_idx = (i + 1) as i64;
            let trimmed = page_text.trim();
            if trimmed.is_empty() {
                continue;
            }
            for para in trimmed.split("\n\n") {
                let para = para.trim();
                if !para.is_empty() {
                    blocks.push(ParsedBlock::text(page_idx, para));
                }
            }
            page_images.push((page_idx, format!("{output_dir}/pages/page-{page_idx}.png")));
        }

        if blocks.is_empty() {
            return Err(AppError::Ingestion("parser produced no structural blocks".to_string()));
        }

        Ok(ParsedDocument {
            json_path: format!("{output_dir}/parsed.json"),
            spans_path: format!("{output_dir}/spans.json"),
            layout_path: format!("{output_dir}/layout.json"),
            images_path: format!("{output_dir}/images"),
            blocks,
            page_images,
        })
    }
}

/// Test double that always fails, used to exercise the `parse_failed` path.
#[cfg(test)]
pub struct FailingParser;

#[cfg(test)]
impl StructuralParser for FailingParser {
    fn parse(&self, _pdf_path: &str, _output_dir: &str) -> Result<ParsedDocument, AppError> {
        Err(AppError::Ingestion("simulated parser failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn single_page_splits_into_paragraph_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, "First paragraph.\n\nSecond paragraph.").unwrap();

        let parsed = PlainTextParser.parse(path.to_str().unwrap(), dir.path().to_str().unwrap()).unwrap();
        assert_eq!(parsed.blocks.len(), 2);
        assert!(parsed.blocks.iter().all(|b| b.page_idx == 1));
        assert_eq!(parsed.page_images.len(), 1);
    }

    #[test]
    fn form_feed_separates_pages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, "Page one text.\u{000c}Page two text.").unwrap();

        let parsed = PlainTextParser.parse(path.to_str().unwrap(), dir.path().to_str().unwrap()).unwrap();
        let pages: std::collections::HashSet<i64> = parsed.blocks.iter().map(|b| b.page_idx).collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(parsed.page_images.len(), 2);
    }

    #[test]
    fn empty_input_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, "   \n\n  ").unwrap();
        let err = PlainTextParser.parse(path.to_str().unwrap(), dir.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::Ingestion(_)));
    }
}
