//! Chunker (component I) — structure-aware segmentation of parsed page
//! blocks into retrieval-grain [`Segment`]s, per spec §4.9.
//!
//! Grounded on the teacher's general approach to deterministic, re-runnable
//! transforms (e.g. `memory/summarizer.rs`'s pure functions over an input
//! slice): chunking takes no I/O and no mutable state, so re-running it on
//! the same parsed input is trivially idempotent — the property required by
//! the ingestion pipeline's re-entry semantics.

use crate::metadata::{Segment, SegmentType};

/// The soft character limit text segments are merged up to. Paragraphs are
/// never split to fit it — it only gates whether another paragraph is
/// folded into the segment being built.
const TEXT_SOFT_LIMIT: usize = 800;

/// How many blocks back a caption may sit from the table/image it
/// describes, per the "within two blocks on the same page" proximity rule.
const CAPTION_PROXIMITY: usize = 2;

/// Character budget for an extractive page summary.
const PAGE_SUMMARY_CHARS: usize = 300;

/// One structural unit produced by the (external) parser, in reading order.
#[derive(Debug, Clone)]
pub struct PageBlock {
    pub kind: BlockKind,
    pub content: String,
    /// Set only for `BlockKind::Image`.
    pub image_path: Option<String>,
}

impl PageBlock {
    pub fn text(content: impl Into<String>) -> Self {
        Self { kind: BlockKind::Text, content: content.into(), image_path: None }
    }
    pub fn title(content: impl Into<String>) -> Self {
        Self { kind: BlockKind::Title, content: content.into(), image_path: None }
    }
    pub fn table(html: impl Into<String>) -> Self {
        Self { kind: BlockKind::Table, content: html.into(), image_path: None }
    }
    pub fn image(caption: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self { kind: BlockKind::Image, content: caption.into(), image_path: Some(image_path.into()) }
    }
    pub fn caption(content: impl Into<String>) -> Self {
        Self { kind: BlockKind::Caption, content: content.into(), image_path: None }
    }
    pub fn footnote(content: impl Into<String>) -> Self {
        Self { kind: BlockKind::Footnote, content: content.into(), image_path: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Table,
    Image,
    Title,
    Caption,
    Footnote,
}

/// Chunk every page of a document into segments, in page order. `pages` is
/// `(page_idx, blocks)` pairs, already ordered by the caller (the Merge
/// stage produces them in page order).
pub fn chunk_document(doc_id: &str, pages: &[(i64, Vec<PageBlock>)], emit_page_summary: bool) -> Vec<Segment> {
    let mut out = Vec::new();
    for (page_idx, blocks) in pages {
        out.extend(chunk_page(doc_id, *page_idx, blocks, emit_page_summary));
    }
    out
}

/// Chunk a single page's blocks. A text segment never crosses a page
/// boundary by construction — this function only ever sees one page.
pub fn chunk_page(doc_id: &str, page_idx: i64, blocks: &[PageBlock], emit_page_summary: bool) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut ordinal: usize = 0;

    let mut text_buf = String::new();
    let mut current_title: Option<String> = None;
    let mut text_title_at_start: Option<String> = None;
    let mut pending_caption: Option<(usize, String)> = None;
    let mut last_table_or_image_idx: Option<usize> = None;
    let mut page_text_for_summary = String::new();

    let flush_text = |buf: &mut String, title: &mut Option<String>, ordinal: &mut usize, segments: &mut Vec<Segment>| {
        if buf.is_empty() {
            return;
        }
        let seg_id = make_seg_id(doc_id, page_idx, *ordinal, SegmentType::Text);
        segments.push(Segment {
            seg_id,
            doc_id: doc_id.to_string(),
            seg_len: buf.len() as i64,
            seg_content: std::mem::take(buf),
            seg_image_path: None,
            seg_caption: title.take(),
            seg_footnote: None,
            seg_type: SegmentType::Text,
            seg_page_idx: page_idx,
            created_at: String::new(),
        });
        *ordinal += 1;
    };

    for (idx, block) in blocks.iter().enumerate() {
        match block.kind {
            BlockKind::Title => {
                flush_text(&mut text_buf, &mut text_title_at_start, &mut ordinal, &mut segments);
                current_title = Some(block.content.clone());
            }
            BlockKind::Text => {
                if !page_text_for_summary.is_empty() {
                    page_text_for_summary.push(' ');
                }
                page_text_for_summary.push_str(&block.content);

                if text_buf.is_empty() {
                    text_title_at_start = current_title.clone();
                }
                let would_be = text_buf.len() + if text_buf.is_empty() { 0 } else { 1 } + block.content.len();
                if !text_buf.is_empty() && would_be > TEXT_SOFT_LIMIT {
                    flush_text(&mut text_buf, &mut text_title_at_start, &mut ordinal, &mut segments);
                    text_title_at_start = current_title.clone();
                }
                if !text_buf.is_empty() {
                    text_buf.push(' ');
                }
                text_buf.push_str(&block.content);
            }
            BlockKind::Caption => {
                pending_caption = Some((idx, block.content.clone()));
            }
            BlockKind::Footnote => {
                if let Some(target_idx) = last_table_or_image_idx {
                    if let Some(seg) = segments.iter_mut().rev().find(|s| {
                        s.seg_type != SegmentType::Text && s.seg_footnote.is_none() && s.seg_page_idx == page_idx
                    }) {
                        let _ = target_idx;
                        seg.seg_footnote = Some(block.content.clone());
                    }
                }
            }
            BlockKind::Table => {
                flush_text(&mut text_buf, &mut text_title_at_start, &mut ordinal, &mut segments);
                let caption = take_proximate_caption(&mut pending_caption, idx);
                let seg_id = make_seg_id(doc_id, page_idx, ordinal, SegmentType::Table);
                segments.push(Segment {
                    seg_id,
                    doc_id: doc_id.to_string(),
                    seg_len: block.content.len() as i64,
                    seg_content: block.content.clone(),
                    seg_image_path: None,
                    seg_caption: caption,
                    seg_footnote: None,
                    seg_type: SegmentType::Table,
                    seg_page_idx: page_idx,
                    created_at: String::new(),
                });
                ordinal += 1;
                last_table_or_image_idx = Some(idx);
            }
            BlockKind::Image => {
                flush_text(&mut text_buf, &mut text_title_at_start, &mut ordinal, &mut segments);
                let caption = take_proximate_caption(&mut pending_caption, idx).or_else(|| {
                    if block.content.is_empty() { None } else { Some(block.content.clone()) }
                });
                let marker = caption.clone().unwrap_or_else(|| "[image]".to_string());
                let seg_id = make_seg_id(doc_id, page_idx, ordinal, SegmentType::Image);
                segments.push(Segment {
                    seg_id,
                    doc_id: doc_id.to_string(),
                    seg_len: marker.len() as i64,
                    seg_content: marker,
                    seg_image_path: block.image_path.clone(),
                    seg_caption: caption,
                    seg_footnote: None,
                    seg_type: SegmentType::Image,
                    seg_page_idx: page_idx,
                    created_at: String::new(),
                });
                ordinal += 1;
                last_table_or_image_idx = Some(idx);
            }
        }
    }
    flush_text(&mut text_buf, &mut text_title_at_start, &mut ordinal, &mut segments);

    if emit_page_summary && !page_text_for_summary.is_empty() {
        let summary: String = page_text_for_summary.chars().take(PAGE_SUMMARY_CHARS).collect();
        let seg_id = make_seg_id(doc_id, page_idx, ordinal, SegmentType::PageSummary);
        segments.push(Segment {
            seg_id,
            doc_id: doc_id.to_string(),
            seg_len: summary.len() as i64,
            seg_content: summary,
            seg_image_path: None,
            seg_caption: None,
            seg_footnote: None,
            seg_type: SegmentType::PageSummary,
            seg_page_idx: page_idx,
            created_at: String::new(),
        });
    }

    segments
}

fn take_proximate_caption(pending: &mut Option<(usize, String)>, current_idx: usize) -> Option<String> {
    match pending.take() {
        Some((cap_idx, text)) if current_idx.saturating_sub(cap_idx) <= CAPTION_PROXIMITY => Some(text),
        other => {
            *pending = other;
            None
        }
    }
}

/// Deterministic segment id: stable across re-chunking of the same parsed
/// input, per spec §4.9 and the idempotence property in §8.
fn make_seg_id(doc_id: &str, page_idx: i64, ordinal: usize, seg_type: SegmentType) -> String {
    format!("{doc_id}-{page_idx}-{ordinal}-{}", seg_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_title_two_paragraphs_and_table() {
        let blocks = vec![
            PageBlock::title("Quarterly Report"),
            PageBlock::text("Revenue grew twelve percent year over year."),
            PageBlock::text("Costs remained flat across all business units."),
            PageBlock::caption("Table 1: Revenue by region"),
            PageBlock::table("<table><tr><td>APAC</td></tr></table>"),
        ];
        let segs = chunk_page("doc-1", 1, &blocks, false);
        // One merged text segment (both paragraphs fit under the soft limit)
        // plus one table segment.
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].seg_type, SegmentType::Text);
        assert_eq!(segs[0].seg_caption.as_deref(), Some("Quarterly Report"));
        assert!(segs[0].seg_content.contains("Revenue grew"));
        assert!(segs[0].seg_content.contains("Costs remained flat"));
        assert_eq!(segs[1].seg_type, SegmentType::Table);
        assert_eq!(segs[1].seg_caption.as_deref(), Some("Table 1: Revenue by region"));
    }

    #[test]
    fn page_summary_gated_by_flag() {
        let blocks = vec![PageBlock::text("Some content on this page.")];
        let without = chunk_page("doc-1", 1, &blocks, false);
        assert!(without.iter().all(|s| s.seg_type != SegmentType::PageSummary));

        let with = chunk_page("doc-1", 1, &blocks, true);
        assert!(with.iter().any(|s| s.seg_type == SegmentType::PageSummary));
    }

    #[test]
    fn text_segments_never_cross_page_boundary() {
        let pages = vec![
            (1, vec![PageBlock::text("Page one content.")]),
            (2, vec![PageBlock::text("Page two content.")]),
        ];
        let segs = chunk_document("doc-1", &pages, false);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].seg_page_idx, 1);
        assert_eq!(segs[1].seg_page_idx, 2);
        assert!(!segs[0].seg_content.contains("Page two"));
    }

    #[test]
    fn long_paragraphs_split_into_multiple_text_segments() {
        let long_para = "x".repeat(500);
        let blocks = vec![
            PageBlock::text(long_para.clone()),
            PageBlock::text(long_para.clone()),
            PageBlock::text(long_para),
        ];
        let segs = chunk_page("doc-1", 1, &blocks, false);
        // 500 + 1 + 500 = 1001 > 800, so the third paragraph cannot join the
        // first pair either; expect at least two text segments.
        assert!(segs.len() >= 2);
        for s in &segs {
            assert!(s.seg_content.len() <= TEXT_SOFT_LIMIT + 1);
        }
    }

    #[test]
    fn image_segment_carries_caption_and_path() {
        let blocks = vec![
            PageBlock::caption("Figure 1: architecture diagram"),
            PageBlock::image("architecture diagram", "/data/images/fig1.png"),
        ];
        let segs = chunk_page("doc-1", 1, &blocks, false);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seg_type, SegmentType::Image);
        assert_eq!(segs[0].seg_caption.as_deref(), Some("Figure 1: architecture diagram"));
        assert_eq!(segs[0].seg_image_path.as_deref(), Some("/data/images/fig1.png"));
    }

    #[test]
    fn footnote_attaches_to_preceding_table() {
        let blocks = vec![
            PageBlock::table("<table></table>"),
            PageBlock::footnote("Source: internal finance system"),
        ];
        let segs = chunk_page("doc-1", 1, &blocks, false);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seg_footnote.as_deref(), Some("Source: internal finance system"));
    }

    #[test]
    fn chunking_is_idempotent() {
        let blocks = vec![
            PageBlock::title("Title"),
            PageBlock::text("Body paragraph."),
            PageBlock::table("<table></table>"),
        ];
        let first = chunk_page("doc-1", 1, &blocks, false);
        let second = chunk_page("doc-1", 1, &blocks, false);
        let ids_1: Vec<_> = first.iter().map(|s| s.seg_id.clone()).collect();
        let ids_2: Vec<_> = second.iter().map(|s| s.seg_id.clone()).collect();
        assert_eq!(ids_1, ids_2);
        let contents_1: Vec<_> = first.iter().map(|s| s.seg_content.clone()).collect();
        let contents_2: Vec<_> = second.iter().map(|s| s.seg_content.clone()).collect();
        assert_eq!(contents_1, contents_2);
    }
}
