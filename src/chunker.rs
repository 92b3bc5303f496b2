//! Content chunking: turns a page plus its detected components into ordered
//! retrieval-unit chunks.
//!
//! Policy, in priority order:
//!
//! 1. **Component-aware** — when components exist, one chunk per form (its
//!    inputs and submit buttons become `nested_chunks`), one per standalone
//!    button, one per table. Fallback text chunks whose content overlaps a
//!    component are dropped to avoid double-indexing.
//! 2. **Section-based** — when the page has headings, each section is chunked
//!    independently and chunks keep document order.
//! 3. **Paragraph** — flat pages are chunked straight from the extracted text.
//!
//! Ordinary text accumulates into a 100–200 word / 800 character band. A
//! paragraph up to 3000 characters is preserved intact; beyond that it is
//! force-split at sentence boundaries with a two-sentence look-back overlap
//! (word-boundary splitting when no sentence boundaries exist). Closing a
//! chunk seeds the next one with the last 50 words, except after a table
//! block, which always starts a fresh chunk. Table blocks are emitted whole
//! regardless of size. Empty spans are skipped and logged, never emitted.

use crate::config::ChunkingConfig;
use crate::models::{
    ChunkMetadata, ComponentType, ContentChunk, DomComponent, PageContent,
};

/// Whitespace-delimited word count, used for all chunk budgets.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Chunk one page. `components` come from the component extractor and may be
/// empty; ordering of the result is the page's retrieval order.
pub fn chunk_page(
    page: &PageContent,
    components: &[DomComponent],
    config: &ChunkingConfig,
) -> Vec<ContentChunk> {
    let mut chunks = Vec::new();

    if !components.is_empty() {
        chunks.extend(component_chunks(components));

        let mut text_chunks = Vec::new();
        collect_text_chunks(page, config, &mut text_chunks);
        text_chunks.retain(|chunk| {
            let overlapping = overlaps_component(chunk, components);
            if overlapping {
                tracing::debug!(
                    section = ?chunk.metadata.section_id,
                    "dropping text chunk that duplicates a component"
                );
            }
            !overlapping
        });
        chunks.extend(text_chunks);
    } else {
        collect_text_chunks(page, config, &mut chunks);
    }

    finalize(chunks, config)
}

fn collect_text_chunks(page: &PageContent, config: &ChunkingConfig, out: &mut Vec<ContentChunk>) {
    if !page.structure.is_flat() {
        // Document order is preserved deliberately: surrounding-chunk lookups
        // at retrieval time are positional.
        for section in &page.structure.sections {
            chunk_text_block(
                &section.content,
                Some(&section.heading),
                Some(&section.id),
                config,
                out,
            );
        }
    } else {
        chunk_text_block(&page.extracted_text, None, None, config, out);
    }
}

/// Chunk one contiguous text block under the word/char band policy.
fn chunk_text_block(
    text: &str,
    heading: Option<&str>,
    section_id: Option<&str>,
    config: &ChunkingConfig,
    out: &mut Vec<ContentChunk>,
) {
    if text.trim().is_empty() {
        tracing::debug!(heading = ?heading, "skipping empty text block");
        return;
    }

    let base_type = if section_id.is_some() {
        ComponentType::Section
    } else {
        ComponentType::Text
    };

    let mut current = String::new();

    for para in split_paragraphs(text) {
        if is_table_block(para) {
            if !current.is_empty() {
                push_text_chunk(out, std::mem::take(&mut current), base_type, heading, section_id);
            }
            // Tables are emitted whole and the next chunk starts fresh,
            // without overlap.
            push_text_chunk(out, para.to_string(), ComponentType::Table, heading, section_id);
            continue;
        }

        if para.len() > config.max_paragraph_chars {
            if !current.is_empty() {
                push_text_chunk(out, std::mem::take(&mut current), base_type, heading, section_id);
            }
            for piece in force_split(para, config) {
                push_text_chunk(out, piece, base_type, heading, section_id);
            }
            continue;
        }

        let over_budget = !current.is_empty()
            && (word_count(&current) + word_count(para) > config.max_words
                || current.len() + 2 + para.len() > config.max_chars);
        if over_budget {
            let overlap = tail_words(&current, config.overlap_words);
            push_text_chunk(out, std::mem::take(&mut current), base_type, heading, section_id);
            current = overlap;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }

    if !current.is_empty() {
        push_text_chunk(out, current, base_type, heading, section_id);
    }
}

fn push_text_chunk(
    out: &mut Vec<ContentChunk>,
    content: String,
    component_type: ComponentType,
    heading: Option<&str>,
    section_id: Option<&str>,
) {
    if content.trim().is_empty() {
        tracing::debug!(heading = ?heading, "skipping empty chunk");
        return;
    }
    out.push(ContentChunk {
        id: String::new(),
        content,
        component_type,
        component: None,
        nested_chunks: Vec::new(),
        metadata: ChunkMetadata {
            heading: heading.map(str::to_string),
            section_id: section_id.map(str::to_string),
            ..ChunkMetadata::default()
        },
    });
}

/// Split text into paragraphs on blank lines; empty paragraphs are dropped.
fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// A block reads as a table when it has at least two lines and every
/// non-empty line is pipe-delimited.
fn is_table_block(para: &str) -> bool {
    let lines: Vec<&str> = para.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.len() >= 2 && lines.iter().all(|l| l.contains('|'))
}

/// Split text into sentences at `.`, `!`, `?` followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            if chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Last `n` words of `text`, joined with single spaces.
fn tail_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    words[words.len().saturating_sub(n)..].join(" ")
}

/// Force-split an oversized paragraph at sentence boundaries, carrying a
/// fixed look-back overlap into each following piece. Falls back to
/// word-boundary splitting when the paragraph has no sentence boundaries.
fn force_split(para: &str, config: &ChunkingConfig) -> Vec<String> {
    let sentences = split_sentences(para);
    if sentences.len() <= 1 {
        return split_by_words(para, config);
    }

    let mut pieces = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for sentence in sentences {
        if !current.is_empty() && current_len + 1 + sentence.len() > config.max_chars {
            pieces.push(current.join(" "));
            let keep_from = current.len().saturating_sub(config.overlap_sentences);
            let overlap = current.split_off(keep_from);
            let overlap_len: usize =
                overlap.iter().map(String::len).sum::<usize>() + overlap.len().saturating_sub(1);
            // An overlap that alone busts the budget would only duplicate
            // itself across pieces; drop it instead.
            if overlap_len < config.max_chars {
                current = overlap;
                current_len = overlap_len;
            } else {
                current = Vec::new();
                current_len = 0;
            }
        }
        current_len += if current.is_empty() {
            sentence.len()
        } else {
            sentence.len() + 1
        };
        current.push(sentence);
    }

    if !current.is_empty() {
        pieces.push(current.join(" "));
    }
    pieces
}

/// Word-boundary splitting for text without sentence boundaries; hard char
/// split as the last resort for a single unbroken token.
fn split_by_words(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 1 {
        let chars: Vec<char> = text.trim().chars().collect();
        return chars
            .chunks(config.max_chars.max(1))
            .map(|c| c.iter().collect())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in words {
        if !current.is_empty() && current.len() + 1 + word.len() > config.max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Build the component-derived chunks: one per form (owning its fields and
/// buttons as nested chunks), one per standalone button, one per table.
fn component_chunks(components: &[DomComponent]) -> Vec<ContentChunk> {
    let mut out = Vec::new();

    for form in components
        .iter()
        .filter(|c| c.component_type == ComponentType::Form)
    {
        let fields: Vec<&DomComponent> = components
            .iter()
            .filter(|c| {
                c.component_type == ComponentType::InputGroup
                    && c.metadata.form_ref.as_deref() == Some(form.selector.as_str())
            })
            .collect();
        let buttons: Vec<&DomComponent> = components
            .iter()
            .filter(|c| {
                c.component_type == ComponentType::Button
                    && c.metadata.form_ref.as_deref() == Some(form.selector.as_str())
            })
            .collect();

        let mut content = String::new();
        let purpose = form
            .metadata
            .purpose
            .clone()
            .unwrap_or_else(|| "form".to_string());
        content.push_str(&capitalize(&purpose));
        content.push('.');
        if !fields.is_empty() {
            let list: Vec<&str> = fields.iter().map(|f| f.text_content.as_str()).collect();
            content.push_str(&format!("\nFields: {}.", list.join(", ")));
        }
        if !buttons.is_empty() {
            let list: Vec<&str> = buttons.iter().map(|b| b.text_content.as_str()).collect();
            content.push_str(&format!("\nButtons: {}.", list.join(", ")));
        }
        content.push_str(&format!("\nSelector: {}", form.selector));
        if let Some(action) = form.attributes.get("action") {
            content.push_str(&format!(" | Action: {}", action));
        }
        if let Some(method) = form.attributes.get("method") {
            content.push_str(&format!(" | Method: {}", method));
        }

        let mut nested = Vec::new();
        for field in &fields {
            nested.push(component_chunk(field, field.text_content.clone()));
        }
        for button in &buttons {
            nested.push(component_chunk(button, format!("Button: {}", button.text_content)));
        }

        let mut chunk = component_chunk(form, content);
        chunk.nested_chunks = nested;
        out.push(chunk);
    }

    for button in components.iter().filter(|c| {
        c.component_type == ComponentType::Button && c.metadata.form_ref.is_none()
    }) {
        out.push(component_chunk(
            button,
            format!("Button: {}", button.text_content),
        ));
    }

    for table in components
        .iter()
        .filter(|c| c.component_type == ComponentType::Table)
    {
        out.push(component_chunk(table, table.text_content.clone()));
    }

    out
}

fn component_chunk(component: &DomComponent, content: String) -> ContentChunk {
    ContentChunk {
        id: String::new(),
        content,
        component_type: component.component_type,
        component: Some(component.clone()),
        nested_chunks: Vec::new(),
        metadata: ChunkMetadata {
            dom_path: Some(component.selector.clone()),
            ..ChunkMetadata::default()
        },
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Whitespace-normalized, pipe-free, lowercase view of text for literal
/// overlap comparisons between fallback chunks and component content.
fn normalize_for_overlap(text: &str) -> String {
    text.chars()
        .map(|c| if c == '|' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Minimum normalized length before a containment match counts as overlap;
/// avoids dropping chunks over trivially short component text.
const OVERLAP_MIN_CHARS: usize = 20;

fn overlaps_component(chunk: &ContentChunk, components: &[DomComponent]) -> bool {
    let chunk_norm = normalize_for_overlap(&chunk.content);
    for component in components {
        if chunk.metadata.dom_path.as_deref() == Some(component.selector.as_str()) {
            return true;
        }
        let comp_norm = normalize_for_overlap(&component.text_content);
        if comp_norm.len() < OVERLAP_MIN_CHARS || chunk_norm.len() < OVERLAP_MIN_CHARS {
            continue;
        }
        if chunk_norm.contains(&comp_norm) || comp_norm.contains(&chunk_norm) {
            return true;
        }
    }
    false
}

/// Assign ids, positions, word counts, nested-chunk ids, and neighbor
/// previews. Chunk ids are unique per page and stable across identical
/// inputs.
fn finalize(mut chunks: Vec<ContentChunk>, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let previews: Vec<String> = chunks
        .iter()
        .map(|c| c.content.chars().take(config.preview_chars).collect())
        .collect();
    let total = chunks.len();

    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.id = format!("chunk-{}", i);
        chunk.metadata.position = i;
        chunk.metadata.word_count = word_count(&chunk.content);
        if i > 0 {
            chunk.metadata.preceding_preview = Some(previews[i - 1].clone());
        }
        if i + 1 < total {
            chunk.metadata.following_preview = Some(previews[i + 1].clone());
        }
        for (j, nested) in chunk.nested_chunks.iter_mut().enumerate() {
            nested.id = format!("chunk-{}-{}-{}", i, nested.component_type, j);
            nested.metadata.position = j;
            nested.metadata.word_count = word_count(&nested.content);
        }
    }
    chunks
}
