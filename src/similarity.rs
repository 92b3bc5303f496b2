//! Cosine similarity and ranked nearest-neighbor search over stored vectors.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("embedding contains a non-finite value")]
    NonFinite,
    #[error("embedding is empty")]
    Empty,
}

/// Cosine similarity in [-1, 1]. A zero-magnitude vector yields `0.0` rather
/// than an error, so all-stopword or empty texts rank last instead of
/// aborting a search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.is_empty() || b.is_empty() {
        return Err(SimilarityError::Empty);
    }
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        if !x.is_finite() || !y.is_finite() {
            return Err(SimilarityError::NonFinite);
        }
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// One ranked search hit. `rank` is 1-based and assigned after sorting.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub chunk_id: String,
    pub similarity: f32,
    pub rank: usize,
}

/// Rank `candidates` against `query` and return the best `top_k`.
///
/// Candidates with invalid vectors fail the whole search; validation
/// problems are caller bugs, not data noise. Ties keep candidate order
/// (stable sort).
pub fn search_similar(
    query: &[f32],
    candidates: &[(String, Vec<f32>)],
    top_k: usize,
) -> Result<Vec<SimilarityMatch>, SimilarityError> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (chunk_id, vector) in candidates {
        let similarity = cosine_similarity(query, vector)?;
        scored.push(SimilarityMatch {
            chunk_id: chunk_id.clone(),
            similarity,
            rank: 0,
        });
    }

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    for (i, entry) in scored.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    Ok(scored)
}
