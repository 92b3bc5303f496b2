//! Structure extraction: headings and sections from raw markup.
//!
//! Scans `<h1>`–`<h6>` markers in document order and anchors each heading in
//! the extracted plain-text stream (exact match first, then case-insensitive)
//! to fix byte offsets. A section spans from the end of one heading's text to
//! the start of the next, or to the end of the document. Pages without
//! headings get a single synthetic section covering the whole text.
//!
//! This is an attribute-level heuristic over markup, not a tree parse;
//! offsets are best-effort and a heading that cannot be located in the text
//! is skipped.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{PageStructure, Section};

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]\s*>").expect("valid heading regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

/// Strip markup tags, decode common entities, and collapse whitespace.
pub(crate) fn strip_tags(markup: &str) -> String {
    let without_tags = TAG_RE.replace_all(markup, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locate `needle` in `haystack` at or after `from`: exact match first, then
/// case-insensitive (ASCII, so byte offsets stay valid).
fn locate(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let tail = haystack.get(from..)?;
    if let Some(pos) = tail.find(needle) {
        return Some(from + pos);
    }
    let lower_tail = tail.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    lower_tail.find(&lower_needle).map(|pos| from + pos)
}

/// Extract the ordered heading/section structure of a page.
///
/// `markup` drives heading detection; `text` is the extracted plain text the
/// sections index into.
pub fn extract_structure(markup: &str, text: &str) -> PageStructure {
    struct Anchor {
        heading: String,
        level: u8,
        text_start: usize,
        text_end: usize,
    }

    let mut headings = Vec::new();
    let mut anchors: Vec<Anchor> = Vec::new();
    let mut cursor = 0usize;

    for caps in HEADING_RE.captures_iter(markup) {
        let level: u8 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        let heading = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or_default());
        if heading.is_empty() {
            continue;
        }
        headings.push(heading.clone());

        // Anchor after the previous heading to preserve document order, with
        // a whole-text fallback for reordered extraction output.
        let found = locate(text, &heading, cursor).or_else(|| locate(text, &heading, 0));
        match found {
            Some(start) => {
                let end = start + heading.len();
                cursor = end;
                anchors.push(Anchor {
                    heading,
                    level,
                    text_start: start,
                    text_end: end,
                });
            }
            None => {
                tracing::debug!(heading = %heading, "heading not found in extracted text, skipping");
            }
        }
    }

    if anchors.is_empty() {
        let sections = if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![Section {
                id: "section-0".to_string(),
                heading: "Content".to_string(),
                level: 0,
                start_offset: 0,
                end_offset: text.len(),
                content: text.to_string(),
            }]
        };
        return PageStructure { sections, headings };
    }

    let mut sections = Vec::with_capacity(anchors.len());
    for (i, anchor) in anchors.iter().enumerate() {
        let start = anchor.text_end;
        let end = anchors
            .get(i + 1)
            .map(|next| next.text_start)
            .unwrap_or(text.len());
        let content = if start < end { &text[start..end] } else { "" };
        sections.push(Section {
            id: format!("section-{}", i),
            heading: anchor.heading.clone(),
            level: anchor.level,
            start_offset: start,
            end_offset: end,
            content: content.trim().to_string(),
        });
    }

    PageStructure { sections, headings }
}
