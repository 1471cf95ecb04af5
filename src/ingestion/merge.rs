//! Merge stage (spec §4.6 stage 3): walk parsed blocks in reading order,
//! group by page, and produce `doc_page_info` rows. Caption/footnote
//! proximity attachment is shared with the Chunker (component I) rather
//! than duplicated here — see DESIGN.md.

use crate::chunker::PageBlock;
use crate::ingestion::parser::{ParsedBlock, ParsedDocument};
use crate::metadata::Page;

/// Group `parsed.blocks` by `page_idx`, preserving reading order within
/// each page and producing pages sorted ascending. Blocks already arrive in
/// reading order from the parser, so this is a stable grouping, not a sort.
pub fn group_by_page(parsed: &ParsedDocument) -> Vec<(i64, Vec<PageBlock>)> {
    let mut pages: Vec<(i64, Vec<PageBlock>)> = Vec::new();
    for block in &parsed.blocks {
        let entry = match pages.iter_mut().find(|(idx, _)| *idx == block.page_idx) {
            Some(entry) => entry,
            None => {
                pages.push((block.page_idx, Vec::new()));
                pages.last_mut().unwrap()
            }
        };
        entry.1.push(to_page_block(block));
    }
    pages.sort_by_key(|(idx, _)| *idx);
    pages
}

fn to_page_block(block: &ParsedBlock) -> PageBlock {
    PageBlock {
        kind: block.kind,
        content: block.content.clone(),
        image_path: block.image_path.clone(),
    }
}

/// Build `doc_page_info` rows from the parser's per-page rendered images.
pub fn page_rows(doc_id: &str, parsed: &ParsedDocument) -> Vec<Page> {
    parsed
        .page_images
        .iter()
        .map(|(page_idx, image_path)| Page {
            doc_id: doc_id.to_string(),
            page_idx: *page_idx,
            image_path: image_path.clone(),
        })
        .collect()
}

/// A small merged-artifact rendition: one `[page N]` header per page
/// followed by each block's content, concatenated. Persisted as the
/// document's `merged_path` artifact — a human-inspectable record of what
/// the pipeline actually chunked.
pub fn render_merged_artifact(pages: &[(i64, Vec<PageBlock>)]) -> String {
    let mut out = String::new();
    for (page_idx, blocks) in pages {
        out.push_str(&format!("[page {page_idx}]\n"));
        for block in blocks {
            out.push_str(&block.content);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::BlockKind;

    fn parsed_with(blocks: Vec<ParsedBlock>) -> ParsedDocument {
        ParsedDocument {
            json_path: "j".into(),
            spans_path: "s".into(),
            layout_path: "l".into(),
            images_path: "i".into(),
            blocks,
            page_images: vec![(1, "p1.png".into()), (2, "p2.png".into())],
        }
    }

    #[test]
    fn blocks_group_by_page_preserving_order() {
        let parsed = parsed_with(vec![
            ParsedBlock::text(1, "a"),
            ParsedBlock::text(2, "b"),
            ParsedBlock::text(1, "c"),
        ]);
        let pages = group_by_page(&parsed);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0, 1);
        assert_eq!(pages[0].1.len(), 2);
        assert_eq!(pages[0].1[0].content, "a");
        assert_eq!(pages[0].1[1].content, "c");
        assert_eq!(pages[1].0, 2);
    }

    #[test]
    fn page_rows_mirror_parser_images() {
        let parsed = parsed_with(vec![ParsedBlock::text(1, "a")]);
        let rows = page_rows("doc-1", &parsed);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].doc_id, "doc-1");
        assert_eq!(rows[0].page_idx, 1);
        assert_eq!(rows[0].image_path, "p1.png");
    }

    #[test]
    fn merged_artifact_contains_page_headers_and_content() {
        let pages = vec![(1i64, vec![PageBlock { kind: BlockKind::Text, content: "hello".into(), image_path: None }])];
        let rendered = render_merged_artifact(&pages);
        assert!(rendered.contains("[page 1]"));
        assert!(rendered.contains("hello"));
    }
}
