//! Embedding abstraction and the built-in deterministic provider.
//!
//! The pool owns one [`Embedder`] per worker; an [`EmbedderFactory`] builds
//! them so workers can be respawned after a crash. Model loading is assumed
//! expensive, so factories are invoked once per worker lifetime, never per
//! request.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Embedding failures, split by blast radius.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// A single inference failed; the worker stays usable and the task may be
    /// retried.
    #[error("embedding failed: {0}")]
    Model(String),
    /// The provider itself is gone; the owning worker must be replaced.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// One embedding provider instance, owned by a single worker.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimensionality.
    fn dims(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Embed one text. Empty input yields the zero vector rather than an
    /// error.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Builds fresh [`Embedder`] instances for worker startup and respawn.
pub trait EmbedderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedError>;

    /// Dimensionality every created embedder will produce.
    fn dims(&self) -> usize;
}

const HASH_DIMS: usize = 384;

/// Deterministic, dependency-free embedder: each whitespace token is hashed
/// into a pseudo-random unit direction and the token vectors are summed and
/// normalized. Identical text always embeds identically, and shared tokens
/// produce correlated vectors, which is enough for offline tests and
/// air-gapped hosts.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dims: HASH_DIMS }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// xorshift64* over a non-zero seed; cheap and stable across platforms.
fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x.wrapping_mul(0x2545_f491_4f6c_dd1d)
}

fn token_vector(token: &str, dims: usize, out: &mut [f32]) {
    let digest = Sha256::digest(token.to_lowercase().as_bytes());
    let mut seed = u64::from_le_bytes(
        digest[..8].try_into().unwrap_or([0x5e; 8]),
    );
    if seed == 0 {
        seed = 0x9e37_79b9_7f4a_7c15;
    }
    for slot in out.iter_mut().take(dims) {
        let raw = xorshift(&mut seed);
        // Map to [-1, 1).
        *slot += (raw >> 11) as f32 / (1u64 << 53) as f32 * 2.0 - 1.0;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dims];
        let mut tokens = 0usize;
        for token in text.split_whitespace() {
            token_vector(token, self.dims, &mut vector);
            tokens += 1;
        }
        if tokens == 0 {
            return Ok(vector);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Factory for [`HashEmbedder`] workers.
pub struct HashEmbedderFactory;

impl EmbedderFactory for HashEmbedderFactory {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
        Ok(Box::new(HashEmbedder::new()))
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }
}
