//! Optional session persistence for tab caches.
//!
//! A [`SessionStore`] lets a host keep processed pages across restarts. The
//! cache consults it before reprocessing and writes a snapshot after every
//! successful processing pass; a `content_hash` over the extracted text
//! guards against serving a snapshot of stale content.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ContentChunk, DomComponent, PageContent};

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store backend error: {0}")]
    Backend(String),
}

/// Everything needed to restore a processed tab without re-embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub page: PageContent,
    pub chunks: Vec<ContentChunk>,
    pub components: Vec<DomComponent>,
    pub embeddings: HashMap<String, Vec<f32>>,
    /// Hex SHA-256 of the extracted text the snapshot was built from.
    pub content_hash: String,
    pub saved_at: DateTime<Utc>,
}

/// Persistence backend keyed by page URL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, url: &str) -> Result<Option<SessionSnapshot>, SessionStoreError>;

    async fn save(&self, url: &str, snapshot: SessionSnapshot) -> Result<(), SessionStoreError>;

    /// Remove one URL's snapshot, or everything when `url` is `None`.
    async fn clear(&self, url: Option<&str>) -> Result<(), SessionStoreError>;
}

/// In-memory store; useful for tests and hosts without persistence.
#[derive(Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<String, SessionSnapshot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, url: &str) -> Result<Option<SessionSnapshot>, SessionStoreError> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots.get(url).cloned())
    }

    async fn save(&self, url: &str, snapshot: SessionSnapshot) -> Result<(), SessionStoreError> {
        let mut snapshots = self.snapshots.write().unwrap();
        snapshots.insert(url.to_string(), snapshot);
        Ok(())
    }

    async fn clear(&self, url: Option<&str>) -> Result<(), SessionStoreError> {
        let mut snapshots = self.snapshots.write().unwrap();
        match url {
            Some(url) => {
                snapshots.remove(url);
            }
            None => snapshots.clear(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageMetadata, PageStructure};

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            page: PageContent {
                url: "https://example.com".to_string(),
                title: "Example".to_string(),
                extracted_text: "hello".to_string(),
                structure: PageStructure::default(),
                metadata: PageMetadata {
                    extracted_at: Utc::now(),
                    word_count: 1,
                },
            },
            chunks: Vec::new(),
            components: Vec::new(),
            embeddings: HashMap::new(),
            content_hash: "abc".to_string(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = InMemorySessionStore::new();
        store
            .save("https://example.com", snapshot())
            .await
            .unwrap();
        let loaded = store.load("https://example.com").await.unwrap().unwrap();
        assert_eq!(loaded.content_hash, "abc");
        assert!(store.load("https://other.com").await.unwrap().is_none());
    }

    #[test]
    fn test_snapshot_survives_json_round_trip() {
        let mut original = snapshot();
        original
            .embeddings
            .insert("chunk-0".to_string(), vec![0.25, -0.5]);
        let json = serde_json::to_string(&original).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.content_hash, original.content_hash);
        assert_eq!(restored.embeddings, original.embeddings);
        assert_eq!(restored.page.url, original.page.url);
    }

    #[tokio::test]
    async fn test_clear_one_and_all() {
        let store = InMemorySessionStore::new();
        store.save("a", snapshot()).await.unwrap();
        store.save("b", snapshot()).await.unwrap();
        store.clear(Some("a")).await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        assert!(store.load("b").await.unwrap().is_some());
        store.clear(None).await.unwrap();
        assert!(store.load("b").await.unwrap().is_none());
    }
}
