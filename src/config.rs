use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper edge of the ordinary-text word band.
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Character budget for ordinary text chunks and force-split pieces.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// A paragraph up to this many characters is preserved intact; beyond it,
    /// the paragraph is force-split at sentence boundaries.
    #[serde(default = "default_max_paragraph_chars")]
    pub max_paragraph_chars: usize,
    /// Words carried from a closed chunk into the next one.
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    /// Sentences of look-back overlap between force-split pieces.
    #[serde(default = "default_overlap_sentences")]
    pub overlap_sentences: usize,
    /// Length of the surrounding-context previews on each chunk.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            max_chars: default_max_chars(),
            max_paragraph_chars: default_max_paragraph_chars(),
            overlap_words: default_overlap_words(),
            overlap_sentences: default_overlap_sentences(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_max_words() -> usize {
    200
}
fn default_max_chars() -> usize {
    800
}
fn default_max_paragraph_chars() -> usize {
    3000
}
fn default_overlap_words() -> usize {
    50
}
fn default_overlap_sentences() -> usize {
    2
}
fn default_preview_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Number of embedding workers. `0` selects the host core count, capped
    /// at 16.
    #[serde(default)]
    pub workers: usize,
    /// Queue depth at which a worker dispatches a batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Per-chunk retries applied by `embed_chunks` on top of worker-level
    /// failure handling.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Run one throwaway inference before a worker signals ready.
    #[serde(default = "default_warmup")]
    pub warmup: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: default_batch_size(),
            init_timeout_secs: default_init_timeout_secs(),
            max_chunk_retries: default_max_chunk_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            warmup: default_warmup(),
        }
    }
}

impl PoolConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Resolved worker count: configured value, or host cores capped at 16.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(16)
    }
}

fn default_batch_size() -> usize {
    160
}
fn default_init_timeout_secs() -> u64 {
    60
}
fn default_max_chunk_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    200
}
fn default_warmup() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ttl_minutes)
    }
}

fn default_ttl_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Similarity a type needs to qualify via the top-2 rule.
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: f32,
    /// Similarity at which a type qualifies regardless of rank.
    #[serde(default = "default_filter_strong_threshold")]
    pub filter_strong_threshold: f32,
    /// Result count for numeric/statistical questions.
    #[serde(default = "default_numeric_top_k")]
    pub numeric_top_k: usize,
    /// Result count for form/interaction questions.
    #[serde(default = "default_form_top_k")]
    pub form_top_k: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Maximum adjacent chunks gathered around each primary result.
    #[serde(default = "default_surrounding_chunks")]
    pub surrounding_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            filter_threshold: default_filter_threshold(),
            filter_strong_threshold: default_filter_strong_threshold(),
            numeric_top_k: default_numeric_top_k(),
            form_top_k: default_form_top_k(),
            default_top_k: default_top_k(),
            surrounding_chunks: default_surrounding_chunks(),
        }
    }
}

fn default_filter_threshold() -> f32 {
    0.2
}
fn default_filter_strong_threshold() -> f32 {
    0.3
}
fn default_numeric_top_k() -> usize {
    2
}
fn default_form_top_k() -> usize {
    5
}
fn default_top_k() -> usize {
    1
}
fn default_surrounding_chunks() -> usize {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.max_words == 0 {
        anyhow::bail!("chunking.max_words must be > 0");
    }
    if config.chunking.max_paragraph_chars < config.chunking.max_chars {
        anyhow::bail!("chunking.max_paragraph_chars must be >= chunking.max_chars");
    }
    if config.pool.batch_size == 0 {
        anyhow::bail!("pool.batch_size must be > 0");
    }
    if config.cache.ttl_minutes <= 0 {
        anyhow::bail!("cache.ttl_minutes must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.filter_threshold)
        || !(-1.0..=1.0).contains(&config.retrieval.filter_strong_threshold)
    {
        anyhow::bail!("retrieval filter thresholds must be in [-1.0, 1.0]");
    }
    if config.retrieval.default_top_k == 0
        || config.retrieval.numeric_top_k == 0
        || config.retrieval.form_top_k == 0
    {
        anyhow::bail!("retrieval top-k values must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunking.max_chars, 800);
        assert_eq!(config.chunking.max_paragraph_chars, 3000);
        assert_eq!(config.pool.batch_size, 160);
        assert_eq!(config.cache.ttl_minutes, 30);
        assert_eq!(config.retrieval.form_top_k, 5);
        assert!(config.pool.worker_count() >= 1);
        assert!(config.pool.worker_count() <= 16);
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chunking]\nmax_words = 150\n\n[pool]\nworkers = 2").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.max_words, 150);
        assert_eq!(config.pool.workers, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.chunking.max_chars, 800);
        assert_eq!(config.cache.ttl_minutes, 30);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nbatch_size = 0").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_paragraph_budget_must_cover_chunk_budget() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chunking]\nmax_paragraph_chars = 100").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
