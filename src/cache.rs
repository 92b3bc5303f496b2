//! Per-tab content cache: the orchestrator of the processing pipeline.
//!
//! `cache_page_content` runs extraction, component detection, chunking, and
//! embedding for one page and stores the result keyed by tab id. Repeated
//! calls for the same tab and unchanged content hit the cache within the
//! TTL; concurrent calls for the same tab/url are deduplicated so the page
//! is processed once and every caller observes that result.
//!
//! Processing happens in phases with explicit yield points between them, so
//! a single large page cannot monopolize the runtime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::chunker::chunk_page;
use crate::components::extract_components;
use crate::config::{ChunkingConfig, Config};
use crate::models::{PageContent, RawPage, TabCache};
use crate::pool::{EmbeddingPool, PoolError};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::session::{SessionSnapshot, SessionStore};
use crate::structure::extract_structure;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Hex SHA-256 of a text, used for content-change detection.
pub(crate) fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct ContentCache {
    chunking: ChunkingConfig,
    ttl: chrono::Duration,
    pool: Arc<EmbeddingPool>,
    session: Option<Arc<dyn SessionStore>>,
    progress: Arc<dyn ProgressReporter>,
    tabs: RwLock<HashMap<String, TabCache>>,
    /// One lock per (tab, url) pair; concurrent processing requests for the
    /// same page serialize on it and the later caller hits the cache.
    inflight: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ContentCache {
    pub fn new(
        config: &Config,
        pool: Arc<EmbeddingPool>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            chunking: config.chunking.clone(),
            ttl: config.cache.ttl(),
            pool,
            session: None,
            progress,
            tabs: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a session store consulted before processing and updated after.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session = Some(store);
        self
    }

    /// Process a page into the cache, or return the cached result when the
    /// tab's content is unchanged and within the TTL.
    pub async fn cache_page_content(&self, raw: RawPage) -> Result<TabCache, CacheError> {
        let hash = content_hash(&raw.text);
        if let Some(cached) = self.lookup_fresh(&raw.tab_id, &raw.url, &hash) {
            tracing::debug!(tab = %raw.tab_id, "cache hit");
            return Ok(cached);
        }

        let key = (raw.tab_id.clone(), raw.url.clone());
        let entry_lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = entry_lock.lock().await;
            // A concurrent caller may have finished while we waited on the
            // lock.
            match self.lookup_fresh(&raw.tab_id, &raw.url, &hash) {
                Some(cached) => {
                    tracing::debug!(tab = %raw.tab_id, "cache hit after in-flight wait");
                    Ok(cached)
                }
                None => self.process(&raw, &hash).await,
            }
        };

        // The map entry must outlive every caller still holding the lock,
        // including after a failed pass; otherwise a queued waiter and a
        // fresh caller with a new entry could process the same page
        // concurrently. The last holder cleans up.
        {
            let mut inflight = self.inflight.lock().await;
            let quiescent = inflight
                .get(&key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &entry_lock) && Arc::strong_count(entry) <= 2);
            if quiescent {
                inflight.remove(&key);
            }
        }
        result
    }

    /// The cached entry for a tab, evicting it first if the TTL has passed.
    pub fn get_cached_content(&self, tab_id: &str) -> Option<TabCache> {
        let mut tabs = self.tabs.write().unwrap();
        match tabs.get(tab_id) {
            Some(cached) if cached.is_fresh(self.ttl) => Some(cached.clone()),
            Some(_) => {
                tracing::debug!(tab = %tab_id, "evicting expired cache entry");
                tabs.remove(tab_id);
                None
            }
            None => None,
        }
    }

    /// Drop one tab's entry, or everything. The session store is cleared to
    /// match, best-effort.
    pub async fn clear(&self, tab_id: Option<&str>) {
        let removed_url = {
            let mut tabs = self.tabs.write().unwrap();
            match tab_id {
                Some(tab_id) => tabs.remove(tab_id).map(|cached| cached.page.url),
                None => {
                    tabs.clear();
                    None
                }
            }
        };
        if let Some(store) = &self.session {
            let target = match (tab_id, &removed_url) {
                (Some(_), Some(url)) => Some(url.as_str()),
                (Some(_), None) => return,
                (None, _) => None,
            };
            if let Err(err) = store.clear(target).await {
                tracing::warn!(error = %err, "failed to clear session store");
            }
        }
    }

    fn lookup_fresh(&self, tab_id: &str, url: &str, hash: &str) -> Option<TabCache> {
        let tabs = self.tabs.read().unwrap();
        let cached = tabs.get(tab_id)?;
        if cached.page.url == url
            && cached.is_fresh(self.ttl)
            && content_hash(&cached.page.extracted_text) == hash
        {
            return Some(cached.clone());
        }
        None
    }

    async fn process(&self, raw: &RawPage, hash: &str) -> Result<TabCache, CacheError> {
        // Session snapshots let a restarted host skip re-embedding entirely,
        // as long as the content hash still matches.
        if let Some(restored) = self.restore_from_session(raw, hash).await {
            return Ok(restored);
        }

        let structure = extract_structure(&raw.markup, &raw.text);
        let page = PageContent::new(
            raw.url.clone(),
            raw.title.clone(),
            raw.text.clone(),
            structure,
        );
        tokio::task::yield_now().await;

        let components = extract_components(&raw.markup);
        self.progress.report(ProgressEvent::ChunkingStarted {
            tab_id: raw.tab_id.clone(),
            sections: page.structure.sections.len(),
            components: components.len(),
        });
        tokio::task::yield_now().await;

        let chunks = chunk_page(&page, &components, &self.chunking);
        self.progress.report(ProgressEvent::ChunkingFinished {
            tab_id: raw.tab_id.clone(),
            chunks: chunks.len(),
        });
        tokio::task::yield_now().await;

        // Only top-level chunks are embedded; nested form fields ride along
        // inside their parent.
        let items: Vec<(String, String)> = chunks
            .iter()
            .map(|c| (c.id.clone(), c.content.clone()))
            .collect();
        let embeddings = self.pool.embed_chunks(items).await?;
        if embeddings.len() < chunks.len() {
            tracing::warn!(
                tab = %raw.tab_id,
                embedded = embeddings.len(),
                chunks = chunks.len(),
                "page cached with incomplete embedding coverage"
            );
        }

        let cached = TabCache {
            page,
            chunks,
            embeddings,
            components,
            cached_at: Utc::now(),
        };

        {
            let mut tabs = self.tabs.write().unwrap();
            tabs.insert(raw.tab_id.clone(), cached.clone());
        }

        if let Some(store) = &self.session {
            let snapshot = SessionSnapshot {
                page: cached.page.clone(),
                chunks: cached.chunks.clone(),
                components: cached.components.clone(),
                embeddings: cached.embeddings.clone(),
                content_hash: hash.to_string(),
                saved_at: Utc::now(),
            };
            if let Err(err) = store.save(&raw.url, snapshot).await {
                tracing::warn!(error = %err, url = %raw.url, "failed to save session snapshot");
            }
        }

        Ok(cached)
    }

    async fn restore_from_session(&self, raw: &RawPage, hash: &str) -> Option<TabCache> {
        let store = self.session.as_ref()?;
        match store.load(&raw.url).await {
            Ok(Some(snapshot)) if snapshot.content_hash == hash => {
                tracing::debug!(url = %raw.url, "restored tab from session snapshot");
                let cached = TabCache {
                    page: snapshot.page,
                    chunks: snapshot.chunks,
                    embeddings: snapshot.embeddings,
                    components: snapshot.components,
                    cached_at: Utc::now(),
                };
                let mut tabs = self.tabs.write().unwrap();
                tabs.insert(raw.tab_id.clone(), cached.clone());
                Some(cached)
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, url = %raw.url, "session load failed, reprocessing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::embedder::{EmbedError, Embedder, EmbedderFactory, HashEmbedderFactory};
    use crate::progress::NoProgress;
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_cache() -> ContentCache {
        let config = Config::default();
        let pool = EmbeddingPool::start(
            PoolConfig {
                workers: 1,
                warmup: false,
                ..PoolConfig::default()
            },
            Arc::new(HashEmbedderFactory),
            Arc::new(NoProgress),
        )
        .await
        .unwrap();
        ContentCache::new(&config, Arc::new(pool), Arc::new(NoProgress))
    }

    fn raw_page(tab_id: &str, text: &str) -> RawPage {
        RawPage {
            tab_id: tab_id.to_string(),
            url: "https://example.com/page".to_string(),
            title: "Example".to_string(),
            markup: format!("<p>{}</p>", text),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_process_and_get() {
        let cache = test_cache().await;
        let cached = cache
            .cache_page_content(raw_page("tab-1", "Some page text to index."))
            .await
            .unwrap();
        assert_eq!(cached.chunks.len(), 1);
        assert_eq!(cached.embeddings.len(), 1);
        let fetched = cache.get_cached_content("tab-1").unwrap();
        assert_eq!(fetched.chunks[0].id, cached.chunks[0].id);
    }

    #[tokio::test]
    async fn test_unchanged_content_hits_cache() {
        let cache = test_cache().await;
        let first = cache
            .cache_page_content(raw_page("tab-1", "Stable content."))
            .await
            .unwrap();
        let second = cache
            .cache_page_content(raw_page("tab-1", "Stable content."))
            .await
            .unwrap();
        assert_eq!(first.cached_at, second.cached_at, "second call must not reprocess");
    }

    #[tokio::test]
    async fn test_changed_content_reprocesses() {
        let cache = test_cache().await;
        let first = cache
            .cache_page_content(raw_page("tab-1", "Original content."))
            .await
            .unwrap();
        let second = cache
            .cache_page_content(raw_page("tab-1", "Updated content."))
            .await
            .unwrap();
        assert_ne!(
            first.page.extracted_text,
            second.page.extracted_text
        );
        assert_eq!(second.page.extracted_text, "Updated content.");
    }

    #[tokio::test]
    async fn test_expired_entry_evicted() {
        let cache = test_cache().await;
        cache
            .cache_page_content(raw_page("tab-1", "Will go stale."))
            .await
            .unwrap();
        {
            let mut tabs = cache.tabs.write().unwrap();
            let entry = tabs.get_mut("tab-1").unwrap();
            entry.cached_at = Utc::now() - chrono::Duration::hours(2);
        }
        assert!(cache.get_cached_content("tab-1").is_none());
        // The eviction is permanent, not just filtered.
        assert!(cache.tabs.read().unwrap().get("tab-1").is_none());
    }

    #[tokio::test]
    async fn test_clear_single_tab() {
        let cache = test_cache().await;
        cache
            .cache_page_content(raw_page("tab-1", "Tab one text."))
            .await
            .unwrap();
        cache
            .cache_page_content(RawPage {
                tab_id: "tab-2".to_string(),
                url: "https://example.com/other".to_string(),
                title: "Other".to_string(),
                markup: "<p>Tab two text.</p>".to_string(),
                text: "Tab two text.".to_string(),
            })
            .await
            .unwrap();
        cache.clear(Some("tab-1")).await;
        assert!(cache.get_cached_content("tab-1").is_none());
        assert!(cache.get_cached_content("tab-2").is_some());
        cache.clear(None).await;
        assert!(cache.get_cached_content("tab-2").is_none());
    }

    #[tokio::test]
    async fn test_progress_events_reported() {
        let progress = Arc::new(crate::progress::test_support::RecordingProgress::new());
        let pool = EmbeddingPool::start(
            PoolConfig {
                workers: 1,
                warmup: false,
                ..PoolConfig::default()
            },
            Arc::new(HashEmbedderFactory),
            Arc::new(NoProgress),
        )
        .await
        .unwrap();
        let cache = ContentCache::new(&Config::default(), Arc::new(pool), progress.clone());
        cache
            .cache_page_content(raw_page("tab-1", "Some text to process."))
            .await
            .unwrap();
        let events = progress.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::ChunkingStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::ChunkingFinished { chunks: 1, .. })));
    }

    #[tokio::test]
    async fn test_concurrent_calls_release_inflight_entry() {
        let cache = Arc::new(test_cache().await);
        let a = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .cache_page_content(raw_page("tab-1", "Shared page text."))
                    .await
            })
        };
        let b = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .cache_page_content(raw_page("tab-1", "Shared page text."))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(cache.inflight.lock().await.is_empty());
    }

    /// Factory whose first embedder always fails fatally and whose
    /// replacements cannot be created, so processing degrades or errors.
    struct BrokenFactory {
        created: AtomicUsize,
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dims(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Unavailable("model gone".to_string()))
        }
    }

    impl EmbedderFactory for BrokenFactory {
        fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
            if self.created.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Box::new(BrokenEmbedder))
            } else {
                Err(EmbedError::Unavailable("replacement failed".to_string()))
            }
        }

        fn dims(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_failed_processing_releases_inflight_entry() {
        let pool = EmbeddingPool::start(
            PoolConfig {
                workers: 1,
                warmup: false,
                retry_delay_ms: 10,
                ..PoolConfig::default()
            },
            Arc::new(BrokenFactory {
                created: AtomicUsize::new(0),
            }),
            Arc::new(NoProgress),
        )
        .await
        .unwrap();
        let cache = Arc::new(ContentCache::new(
            &Config::default(),
            Arc::new(pool),
            Arc::new(NoProgress),
        ));

        // Two concurrent requests for the same page while embedding is
        // broken. Whatever each call returns, both must finish, and the
        // waiter must not end up processing alongside a third caller that
        // installed a fresh lock for the same page.
        let a = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .cache_page_content(raw_page("tab-1", "Unembeddable text."))
                    .await
            })
        };
        let b = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .cache_page_content(raw_page("tab-1", "Unembeddable text."))
                    .await
            })
        };
        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            let _ = a.await.unwrap();
            let _ = b.await.unwrap();
        })
        .await;
        assert!(joined.is_ok(), "both callers must finish");
        assert!(cache.inflight.lock().await.is_empty());

        // The map is clean, so a later request gets its own fresh pass.
        let again = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            cache.cache_page_content(raw_page("tab-1", "Unembeddable text.")),
        )
        .await;
        assert!(again.is_ok(), "later caller must not deadlock");
    }

    #[tokio::test]
    async fn test_session_snapshot_restored() {
        let config = Config::default();
        let pool = Arc::new(
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
            .unwrap(),
        );
        let store = Arc::new(InMemorySessionStore::new());
        let cache = ContentCache::new(&config, Arc::clone(&pool), Arc::new(NoProgress))
            .with_session_store(store.clone());

        let raw = raw_page("tab-1", "Snapshot me.");
        let first = cache.cache_page_content(raw.clone()).await.unwrap();
        assert!(store.load(&raw.url).await.unwrap().is_some());

        // A second cache instance sharing the store restores without
        // reprocessing; the chunk ids line up with the snapshot.
        let cache2 = ContentCache::new(&config, pool, Arc::new(NoProgress))
            .with_session_store(store);
        let restored = cache2.cache_page_content(raw).await.unwrap();
        assert_eq!(restored.chunks.len(), first.chunks.len());
        assert_eq!(restored.embeddings, first.embeddings);
    }
}
