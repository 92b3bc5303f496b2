//! Component-type filter: narrows a search to the chunk types a question is
//! about by comparing the query embedding against canonical type
//! descriptions.
//!
//! Description embeddings are computed once per filter instance and cached;
//! a failed computation degrades to "no filtering" and is not cached, so a
//! recovered pool repairs the filter on the next question.

use std::collections::HashMap;

use tokio::sync::OnceCell;

use crate::config::RetrievalConfig;
use crate::models::ComponentType;
use crate::pool::EmbeddingPool;
use crate::similarity::cosine_similarity;

/// Canonical description per chunk type; the embedding of each is what the
/// query is matched against.
const TYPE_DESCRIPTIONS: [(ComponentType, &str); 8] = [
    (
        ComponentType::Form,
        "a form for submitting information, signing up, logging in, booking, or contacting",
    ),
    (
        ComponentType::InputGroup,
        "an input field where the user types or selects a value",
    ),
    (
        ComponentType::Button,
        "a button the user clicks to perform an action",
    ),
    (
        ComponentType::Table,
        "a table of rows and columns with structured data, numbers, or prices",
    ),
    (
        ComponentType::List,
        "a list of related items or options",
    ),
    (
        ComponentType::Text,
        "a paragraph of descriptive text content",
    ),
    (
        ComponentType::Section,
        "a titled section of page content",
    ),
    (
        ComponentType::Heading,
        "a heading introducing part of the page",
    ),
];

/// Reusable filter; one instance per cache/retriever is enough.
pub struct TypeFilter {
    type_embeddings: OnceCell<HashMap<ComponentType, Vec<f32>>>,
}

impl TypeFilter {
    pub fn new() -> Self {
        Self {
            type_embeddings: OnceCell::new(),
        }
    }

    /// Which chunk types the question is about. The top two types scoring
    /// above the base threshold qualify, plus every type above the strong
    /// threshold; generic text-like types are dropped whenever a specific
    /// type qualified. An empty result means "do not filter".
    pub async fn relevant_types(
        &self,
        query_embedding: &[f32],
        pool: &EmbeddingPool,
        config: &RetrievalConfig,
    ) -> Vec<ComponentType> {
        let embeddings = match self.embeddings(pool).await {
            Some(embeddings) => embeddings,
            None => return Vec::new(),
        };

        let mut scored: Vec<(ComponentType, f32)> = Vec::with_capacity(embeddings.len());
        for (component_type, vector) in embeddings {
            match cosine_similarity(query_embedding, vector) {
                Ok(similarity) => scored.push((*component_type, similarity)),
                Err(err) => {
                    tracing::warn!(error = %err, "type filter similarity failed, skipping filter");
                    return Vec::new();
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut qualified: Vec<ComponentType> = Vec::new();
        for (i, (component_type, similarity)) in scored.iter().enumerate() {
            let in_top_two = i < 2 && *similarity > config.filter_threshold;
            let strong = *similarity >= config.filter_strong_threshold;
            if in_top_two || strong {
                qualified.push(*component_type);
            }
        }

        if qualified.iter().any(|t| !t.is_generic()) {
            qualified.retain(|t| !t.is_generic());
        }
        tracing::debug!(types = ?qualified, "type filter result");
        qualified
    }

    /// Cached description embeddings; `None` while the pool cannot serve
    /// them. Failures are not cached.
    async fn embeddings(
        &self,
        pool: &EmbeddingPool,
    ) -> Option<&HashMap<ComponentType, Vec<f32>>> {
        let result = self
            .type_embeddings
            .get_or_try_init(|| async {
                let mut map = HashMap::with_capacity(TYPE_DESCRIPTIONS.len());
                for (component_type, description) in TYPE_DESCRIPTIONS {
                    let vector = pool.embed_text(description).await?;
                    map.insert(component_type, vector);
                }
                Ok::<_, crate::pool::PoolError>(map)
            })
            .await;
        match result {
            Ok(map) => Some(map),
            Err(err) => {
                tracing::warn!(error = %err, "type description embedding failed, filter disabled");
                None
            }
        }
    }
}

impl Default for TypeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::embedder::HashEmbedderFactory;
    use crate::progress::NoProgress;
    use std::sync::Arc;

    async fn test_pool() -> EmbeddingPool {
        EmbeddingPool::start(
            PoolConfig {
                workers: 1,
                warmup: false,
                ..PoolConfig::default()
            },
            Arc::new(HashEmbedderFactory),
            Arc::new(NoProgress),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_exact_description_match_qualifies() {
        let pool = test_pool().await;
        let filter = TypeFilter::new();
        let config = RetrievalConfig::default();
        // A query that is literally a type description must rank that type
        // first with similarity 1.0.
        let query = pool
            .embed_text("a table of rows and columns with structured data, numbers, or prices")
            .await
            .unwrap();
        let types = filter.relevant_types(&query, &pool, &config).await;
        assert!(types.contains(&ComponentType::Table));
        assert!(
            types.iter().all(|t| !t.is_generic()),
            "generics dropped when a specific type qualifies"
        );
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_high_threshold_disables_filtering() {
        let pool = test_pool().await;
        let filter = TypeFilter::new();
        let config = RetrievalConfig {
            filter_threshold: 0.99,
            filter_strong_threshold: 0.999,
            ..RetrievalConfig::default()
        };
        let query = pool.embed_text("completely unrelated wording").await.unwrap();
        let types = filter.relevant_types(&query, &pool, &config).await;
        assert!(types.is_empty(), "nothing qualifies above 0.99");
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_descriptions_cached_across_calls() {
        let pool = test_pool().await;
        let filter = TypeFilter::new();
        let config = RetrievalConfig::default();
        let query = pool.embed_text("where is the signup form").await.unwrap();
        let first = filter.relevant_types(&query, &pool, &config).await;
        let second = filter.relevant_types(&query, &pool, &config).await;
        assert_eq!(first, second);
        pool.shutdown();
    }
}
