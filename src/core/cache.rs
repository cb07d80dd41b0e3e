use crate::domain::model::{AcquisitionMethod, ImageCacheEntry};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Byte cache keyed by absolute URL, scoped to one engine instance.
/// Constructed fresh per run unless the caller deliberately shares it;
/// there is no module-level state.
#[derive(Clone, Default)]
pub struct ImageCache {
    entries: Arc<Mutex<HashMap<String, ImageCacheEntry>>>,
    /// Network attempts actually performed. Instrumentation so tests can
    /// assert that repeated lookups are cache hits.
    attempts: Arc<AtomicUsize>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url: &str) -> Option<ImageCacheEntry> {
        let entries = self.entries.lock().await;
        entries.get(url).cloned()
    }

    pub async fn insert(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        method: AcquisitionMethod,
    ) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            url.to_string(),
            ImageCacheEntry {
                bytes,
                content_type,
                method,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Used when an embed rejects the cached bytes: drop the entry so the
    /// acquirer can retry the URL once.
    pub async fn evict(&self, url: &str) -> bool {
        let mut entries = self.entries.lock().await;
        entries.remove(url).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// URLs that exhausted every strategy in this run. Short-circuits
/// redundant retries; cleared at the start of each new run.
#[derive(Clone, Default)]
pub struct FailedImageSet {
    urls: Arc<Mutex<HashSet<String>>>,
}

impl FailedImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.urls.lock().await.contains(url)
    }

    pub async fn insert(&self, url: &str) {
        self.urls.lock().await.insert(url.to_string());
    }

    pub async fn remove(&self, url: &str) {
        self.urls.lock().await.remove(url);
    }

    pub async fn clear(&self) {
        self.urls.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.urls.lock().await.len()
    }
}
