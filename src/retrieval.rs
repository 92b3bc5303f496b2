//! Question answering support: turn a natural-language question into the
//! most relevant chunks of a cached page, with surrounding context.
//!
//! The result-count heuristic looks at the question shape: numeric or
//! statistical questions get extra results (tables often split the answer
//! across chunks), form or interaction questions get a wide net, everything
//! else gets a single best chunk. Numeric wins when both patterns match.
//!
//! When the component-type filter narrows the candidate set and the filtered
//! search finds nothing at all, the search is rerun unfiltered so a misjudged
//! filter can never hide the best answer entirely. A filtered search that
//! found anything is returned as-is, even below the requested result count;
//! padding it with unfiltered chunks would defeat the filter.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;

use crate::cache::ContentCache;
use crate::config::RetrievalConfig;
use crate::filter::TypeFilter;
use crate::models::{ContentChunk, TabCache};
use crate::pool::{EmbeddingPool, PoolError};
use crate::progress::{ProgressEvent, ProgressReporter, RetrievalStage};
use crate::similarity::{search_similar, SimilarityError, SimilarityMatch};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("page has chunks but no embeddings")]
    NoEmbeddings,
    #[error("question produced an empty embedding")]
    EmptyQueryEmbedding,
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(how many|how much|price|prices|cost|costs|total|number of|average|percent|percentage|statistics)\b|\d",
    )
    .expect("valid numeric-question regex")
});

static INTERACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(form|submit|fill|button|click|input|field|fields|sign ?up|log ?in|register|book|booking|enter)\b",
    )
    .expect("valid interaction-question regex")
});

/// Everything handed back for one question.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Best-matching chunks in rank order; nested form-field chunks ride
    /// along inside their parent.
    pub primary: Vec<ContentChunk>,
    /// Positional neighbors of the primary chunks, in document order.
    pub surrounding: Vec<ContentChunk>,
    /// Section of the top match, when it came from a sectioned page.
    pub section_heading: Option<String>,
    pub section_id: Option<String>,
    /// Raw ranked matches, including similarity scores.
    pub matches: Vec<SimilarityMatch>,
}

pub struct Retriever {
    cache: Arc<ContentCache>,
    pool: Arc<EmbeddingPool>,
    filter: TypeFilter,
    progress: Arc<dyn ProgressReporter>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        cache: Arc<ContentCache>,
        pool: Arc<EmbeddingPool>,
        progress: Arc<dyn ProgressReporter>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            cache,
            pool,
            filter: TypeFilter::new(),
            progress,
            config,
        }
    }

    /// Answer-context lookup for one tab. `Ok(None)` means the tab has no
    /// usable cache entry or nothing matched; both are normal outcomes.
    pub async fn retrieve_context(
        &self,
        tab_id: &str,
        question: &str,
    ) -> Result<Option<RetrievedContext>, RetrievalError> {
        let Some(cached) = self.cache.get_cached_content(tab_id) else {
            tracing::debug!(tab = %tab_id, "no cached content for tab");
            return Ok(None);
        };
        if cached.chunks.is_empty() {
            return Ok(None);
        }
        if cached.embeddings.is_empty() {
            return Err(RetrievalError::NoEmbeddings);
        }
        if cached.embeddings.len() < cached.chunks.len() {
            tracing::warn!(
                tab = %tab_id,
                embedded = cached.embeddings.len(),
                chunks = cached.chunks.len(),
                "retrieving over incomplete embedding coverage"
            );
        }

        let query = self.pool.embed_text(question).await?;
        if query.is_empty() || query.iter().all(|v| *v == 0.0) {
            return Err(RetrievalError::EmptyQueryEmbedding);
        }

        let top_k = self.resolve_top_k(question);

        self.progress.report(ProgressEvent::RetrievalStage {
            stage: RetrievalStage::Filtering,
        });
        let types = self
            .filter
            .relevant_types(&query, &self.pool, &self.config)
            .await;

        let candidates: Vec<(String, Vec<f32>)> = cached
            .chunks
            .iter()
            .filter_map(|chunk| {
                cached
                    .embeddings
                    .get(&chunk.id)
                    .map(|v| (chunk.id.clone(), v.clone()))
            })
            .collect();
        let filtered: Vec<(String, Vec<f32>)> = if types.is_empty() {
            candidates.clone()
        } else {
            let by_id: HashMap<&str, &ContentChunk> =
                cached.chunks.iter().map(|c| (c.id.as_str(), c)).collect();
            candidates
                .iter()
                .filter(|(id, _)| {
                    by_id
                        .get(id.as_str())
                        .is_some_and(|chunk| types.contains(&chunk.component_type))
                })
                .cloned()
                .collect()
        };

        self.progress.report(ProgressEvent::RetrievalStage {
            stage: RetrievalStage::Searching,
        });
        let mut matches = search_similar(&query, &filtered, top_k)?;

        // Fall back to the unfiltered set only when the filtered search
        // found nothing.
        if !types.is_empty() && matches.is_empty() {
            tracing::debug!("filtered search empty, retrying unfiltered");
            matches = search_similar(&query, &candidates, top_k)?;
        }
        if matches.is_empty() {
            return Ok(None);
        }

        self.progress.report(ProgressEvent::RetrievalStage {
            stage: RetrievalStage::Assembling,
        });
        Ok(Some(self.assemble(&cached, matches)))
    }

    /// Result count by question shape; numeric beats interaction when both
    /// patterns match.
    fn resolve_top_k(&self, question: &str) -> usize {
        if NUMERIC_RE.is_match(question) {
            self.config.numeric_top_k
        } else if INTERACTION_RE.is_match(question) {
            self.config.form_top_k
        } else {
            self.config.default_top_k
        }
    }

    fn assemble(&self, cached: &TabCache, matches: Vec<SimilarityMatch>) -> RetrievedContext {
        let position_of: HashMap<&str, usize> = cached
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();

        let mut primary = Vec::with_capacity(matches.len());
        let mut primary_positions = Vec::new();
        for m in &matches {
            if let Some(&pos) = position_of.get(m.chunk_id.as_str()) {
                primary.push(cached.chunks[pos].clone());
                primary_positions.push(pos);
            }
        }

        let taken: HashSet<usize> = primary_positions.iter().copied().collect();
        let mut surrounding_positions: Vec<usize> = Vec::new();
        for &pos in &primary_positions {
            let mut collected = 0usize;
            let mut delta = 1usize;
            while collected < self.config.surrounding_chunks && delta <= cached.chunks.len() {
                for candidate in [pos.checked_sub(delta), pos.checked_add(delta)] {
                    let Some(candidate) = candidate else { continue };
                    if candidate >= cached.chunks.len()
                        || taken.contains(&candidate)
                        || surrounding_positions.contains(&candidate)
                    {
                        continue;
                    }
                    if collected < self.config.surrounding_chunks {
                        surrounding_positions.push(candidate);
                        collected += 1;
                    }
                }
                delta += 1;
            }
        }
        surrounding_positions.sort_unstable();
        let surrounding: Vec<ContentChunk> = surrounding_positions
            .into_iter()
            .map(|pos| cached.chunks[pos].clone())
            .collect();

        let section_heading = primary
            .first()
            .and_then(|c| c.metadata.heading.clone());
        let section_id = primary
            .first()
            .and_then(|c| c.metadata.section_id.clone());

        RetrievedContext {
            primary,
            surrounding,
            section_heading,
            section_id,
            matches,
        }
    }
}
