//! Core data models used throughout Pagesense.
//!
//! These types represent the page content, detected components, chunks, and
//! per-tab caches that flow through the chunking, embedding, and retrieval
//! pipeline. Everything is serde-serializable so an optional session store
//! can snapshot a whole tab cache.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structural type of a chunk or detected page component.
///
/// The first four variants describe interactive DOM components; the rest
/// describe ordinary content chunks. The component-type filter scores all
/// of them against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentType {
    Form,
    InputGroup,
    Button,
    Table,
    List,
    Text,
    Section,
    Heading,
}

impl ComponentType {
    /// Generic types match almost every query; the filter drops them when a
    /// specific type also qualifies.
    pub fn is_generic(self) -> bool {
        matches!(
            self,
            ComponentType::Text | ComponentType::Section | ComponentType::Heading
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Form => "form",
            ComponentType::InputGroup => "input-group",
            ComponentType::Button => "button",
            ComponentType::Table => "table",
            ComponentType::List => "list",
            ComponentType::Text => "text",
            ComponentType::Section => "section",
            ComponentType::Heading => "heading",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous region of the extracted text under one heading.
///
/// Offsets are byte positions into [`PageContent::extracted_text`]; `content`
/// is the owned substring between them. Sections are ordered by document
/// appearance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub heading: String,
    /// Heading level (`<h1>` = 1 … `<h6>` = 6, 0 for the synthetic
    /// whole-document section).
    pub level: u8,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
}

/// Ordered structural view of a page: sections plus the raw heading list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageStructure {
    pub sections: Vec<Section>,
    pub headings: Vec<String>,
}

impl PageStructure {
    /// True when the extractor found no real headings and produced only the
    /// synthetic whole-document section.
    pub fn is_flat(&self) -> bool {
        self.headings.is_empty()
    }
}

/// Metadata attached to a detected DOM component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Whether the component accepts user interaction (forms, inputs,
    /// buttons; tables do not).
    pub interactive: bool,
    /// Selector of the owning form, for inputs and submit buttons nested
    /// inside one.
    pub form_ref: Option<String>,
    pub required: bool,
    pub placeholder: Option<String>,
    pub label: Option<String>,
    /// Inferred human-readable purpose, e.g. `"booking form"`. Injected into
    /// the component's chunk text so it is discoverable by intent.
    pub purpose: Option<String>,
}

/// An interactive or structurally significant page element detected by the
/// component extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomComponent {
    pub component_type: ComponentType,
    pub id: Option<String>,
    /// Best-effort locator: `#id`, `[name=…]`, or structural position.
    /// Not guaranteed unique.
    pub selector: String,
    pub attributes: HashMap<String, String>,
    pub text_content: String,
    pub metadata: ComponentMetadata,
}

/// Per-chunk metadata: position, provenance, and neighbor previews.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub heading: Option<String>,
    /// Index of the chunk in the page's top-level chunk order.
    pub position: usize,
    pub word_count: usize,
    /// Selector path when the chunk was produced from a DOM component.
    pub dom_path: Option<String>,
    pub section_id: Option<String>,
    /// First characters of the preceding top-level chunk.
    pub preceding_preview: Option<String>,
    /// First characters of the following top-level chunk.
    pub following_preview: Option<String>,
}

/// The unit of embedding and retrieval.
///
/// Component chunks (forms) own their input and button chunks via
/// `nested_chunks`; nested chunks never appear at the top level but are
/// surfaced alongside their parent at retrieval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Unique within one page, stable across identical inputs.
    pub id: String,
    /// Text fed to the embedding model.
    pub content: String,
    pub component_type: ComponentType,
    /// Back-reference to the originating component, when any.
    pub component: Option<DomComponent>,
    pub nested_chunks: Vec<ContentChunk>,
    pub metadata: ChunkMetadata,
}

/// Page-level metadata captured at extraction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub extracted_at: DateTime<Utc>,
    pub word_count: usize,
}

/// Immutable snapshot of one page's content, built once per cache cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub extracted_text: String,
    pub structure: PageStructure,
    pub metadata: PageMetadata,
}

impl PageContent {
    pub fn new(url: String, title: String, extracted_text: String, structure: PageStructure) -> Self {
        let word_count = extracted_text.split_whitespace().count();
        Self {
            url,
            title,
            extracted_text,
            structure,
            metadata: PageMetadata {
                extracted_at: Utc::now(),
                word_count,
            },
        }
    }
}

/// Per-tab bundle of everything retrieval needs: page, ordered chunks,
/// chunk-id → embedding map, and detected components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabCache {
    pub page: PageContent,
    pub chunks: Vec<ContentChunk>,
    pub embeddings: HashMap<String, Vec<f32>>,
    pub components: Vec<DomComponent>,
    pub cached_at: DateTime<Utc>,
}

impl TabCache {
    /// Whether the entry is still within its TTL.
    pub fn is_fresh(&self, ttl: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.cached_at) < ttl
    }
}

/// Raw upstream input for one caching pass: what the browser shell hands us
/// for a tab.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub tab_id: String,
    pub url: String,
    pub title: String,
    /// Raw markup, used for structure and component detection.
    pub markup: String,
    /// Extracted plain text, the chunking substrate.
    pub text: String,
}
