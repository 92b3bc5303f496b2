//! Pagesense turns raw page content into an embedding-indexed knowledge base
//! that can answer natural-language questions about the page.
//!
//! ```text
//!   raw markup + text
//!         |
//!         v
//!   structure ── headings/sections
//!         |
//!   components ── forms, inputs, buttons, tables
//!         |
//!   chunker ── ordered retrieval units
//!         |
//!   pool ── embedding worker pool (supervised actors)
//!         |
//!   cache ── per-tab TTL cache (+ optional session store)
//!         |
//!   retrieval ── type filter + similarity search + context assembly
//! ```
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | [`config`]   | TOML configuration with validation                    |
//! | [`models`]   | Shared data types                                     |
//! | [`structure`]| Heading/section extraction from markup                |
//! | [`components`]| Form, input, button, and table detection             |
//! | [`chunker`]  | Content chunking policy                               |
//! | [`embedder`] | Embedding provider trait + deterministic default      |
//! | [`pool`]     | Supervised embedding worker pool                      |
//! | [`cache`]    | Per-tab content cache and processing orchestration    |
//! | [`session`]  | Optional cross-restart snapshot persistence           |
//! | [`similarity`]| Cosine similarity and ranked search                  |
//! | [`filter`]   | Component-type query filter                           |
//! | [`retrieval`]| Question-to-context retrieval                         |
//! | [`progress`] | Pipeline progress events                              |

pub mod cache;
pub mod chunker;
pub mod components;
pub mod config;
pub mod embedder;
pub mod filter;
pub mod models;
pub mod pool;
pub mod progress;
pub mod retrieval;
pub mod session;
pub mod similarity;
pub mod structure;

pub use cache::{CacheError, ContentCache};
pub use chunker::chunk_page;
pub use components::extract_components;
pub use config::{load_config, Config};
pub use embedder::{EmbedError, Embedder, EmbedderFactory, HashEmbedder, HashEmbedderFactory};
pub use filter::TypeFilter;
pub use models::{
    ComponentType, ContentChunk, DomComponent, PageContent, PageStructure, RawPage, TabCache,
};
pub use pool::{EmbeddingPool, PoolError};
pub use progress::{NoProgress, ProgressEvent, ProgressReporter, TracingProgress};
pub use retrieval::{RetrievalError, RetrievedContext, Retriever};
pub use session::{InMemorySessionStore, SessionSnapshot, SessionStore};
pub use similarity::{cosine_similarity, search_similar, SimilarityMatch};
pub use structure::extract_structure;
