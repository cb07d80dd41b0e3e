use crate::core::cache::{FailedImageSet, ImageCache};
use crate::core::cancel::CancelSignal;
use crate::domain::model::{AcquisitionMethod, GenerationProgress, ImageCacheEntry, ProgressFn};
use crate::domain::ports::LocalImageSource;
use crate::utils::error::{Result, SheetError};
use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Bodies shorter than this are not plausibly card images, whatever the
/// upstream status said.
pub const MIN_IMAGE_BYTES: usize = 1000;

/// One consistent constants set; the per-strategy timeouts bound a single
/// attempt, not the whole batch.
const MAX_RETRY_PASSES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const PROXY_TIMEOUT: Duration = Duration::from_secs(20);
const DIRECT_TIMEOUT: Duration = Duration::from_secs(12);
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct AcquireConfig {
    /// Base URL of the same-origin image proxy; unset skips the strategy.
    pub proxy_base: Option<String>,
    /// Base URL of a legacy CORS relay; unset skips the strategy.
    pub relay_base: Option<String>,
    /// Chunk size for batched preloads; peak in-flight requests.
    pub concurrent_requests: usize,
}

/// Per-URL strategy chain plus the batched preload scheduler. Owns the
/// byte cache and the failed-URL set for the engine instance.
pub struct ImageAcquirer {
    client: reqwest::Client,
    cache: ImageCache,
    failed: FailedImageSet,
    cancel: CancelSignal,
    config: AcquireConfig,
    local_source: Option<Arc<dyn LocalImageSource>>,
}

impl ImageAcquirer {
    pub fn new(
        config: AcquireConfig,
        cache: ImageCache,
        cancel: CancelSignal,
        local_source: Option<Arc<dyn LocalImageSource>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            failed: FailedImageSet::new(),
            cancel,
            config,
            local_source,
        }
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn failed(&self) -> &FailedImageSet {
        &self.failed
    }

    /// Clears run-scoped failure memory. Called once at the start of each
    /// generation run; the byte cache deliberately survives.
    pub async fn reset_run(&self) {
        self.failed.clear().await;
    }

    /// Bulk preload: chunks the URL set and awaits each chunk to full
    /// settlement before the next starts, so one URL's failure never
    /// aborts its siblings and peak concurrency stays bounded. Invokes
    /// the progress callback after every URL. Only cancellation
    /// propagates; everything else degrades to the failed set.
    pub async fn preload(&self, urls: &[String], progress: &ProgressFn<'_>) -> Result<usize> {
        let total = urls.len() as u32;
        let done = AtomicU32::new(0);
        let done = &done;
        let mut loaded = 0usize;
        let chunk_size = self.config.concurrent_requests.max(1);

        for chunk in urls.chunks(chunk_size) {
            // Batch boundary: the one place a cancel stops scheduling.
            self.cancel.check()?;

            let attempts = chunk.iter().map(|url| async move {
                let result = self.acquire(url).await;
                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                let message = match &result {
                    Ok(entry) => format!("Loaded image ({:?}): {}", entry.method, url),
                    Err(SheetError::Cancelled) => "Cancelled".to_string(),
                    Err(e) => format!("Image failed: {} ({})", url, e),
                };
                progress(&GenerationProgress {
                    current,
                    total,
                    message,
                });
                result
            });

            for result in join_all(attempts).await {
                match result {
                    Ok(_) => loaded += 1,
                    Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                    Err(e) => {
                        tracing::warn!("image preload failure: {}", e);
                    }
                }
            }
        }

        tracing::info!(
            "📦 preload complete: {}/{} images, {} failed",
            loaded,
            urls.len(),
            self.failed.len().await
        );
        Ok(loaded)
    }

    /// Acquires one URL through the strategy chain, with capped retry
    /// passes. First success wins and is cached.
    pub async fn acquire(&self, url: &str) -> Result<ImageCacheEntry> {
        if let Some(entry) = self.cache.get(url).await {
            return Ok(ImageCacheEntry {
                method: AcquisitionMethod::Cache,
                ..entry
            });
        }
        if self.failed.contains(url).await {
            return Err(SheetError::Acquisition {
                url: url.to_string(),
                reason: "already exhausted every strategy this run".to_string(),
            });
        }

        let mut last_error = None;
        for pass in 1..=MAX_RETRY_PASSES {
            self.cancel.check()?;

            match self.try_strategies(url).await {
                Ok(entry) => {
                    self.cache
                        .insert(url, entry.bytes.clone(), entry.content_type.clone(), entry.method)
                        .await;
                    return Ok(entry);
                }
                Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                Err(e) => {
                    tracing::debug!("pass {}/{} failed for {}: {}", pass, MAX_RETRY_PASSES, url, e);
                    last_error = Some(e);
                    if pass < MAX_RETRY_PASSES {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        self.failed.insert(url).await;
        Err(last_error.unwrap_or_else(|| SheetError::Acquisition {
            url: url.to_string(),
            reason: "no strategy available".to_string(),
        }))
    }

    /// Tries a record's URL candidates best-first; the first one that any
    /// strategy can fetch wins.
    pub async fn acquire_any(&self, candidates: &[String]) -> Result<ImageCacheEntry> {
        let mut last_error = None;
        for url in candidates {
            match self.acquire(url).await {
                Ok(entry) => return Ok(entry),
                Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| SheetError::Acquisition {
            url: "<none>".to_string(),
            reason: "record has no image candidates".to_string(),
        }))
    }

    /// One pass over the chain: local source, proxy, direct, relay.
    async fn try_strategies(&self, url: &str) -> Result<ImageCacheEntry> {
        let mut last_error: Option<SheetError> = None;

        if let Some(source) = &self.local_source {
            self.cancel.check()?;
            if let Some(bytes) = source.bytes_for(url).await {
                if bytes.len() >= MIN_IMAGE_BYTES {
                    return Ok(entry(bytes, None, AcquisitionMethod::LocalSource));
                }
                last_error = Some(too_small(url, bytes.len()));
            }
        }

        if let Some(base) = &self.config.proxy_base {
            let proxied = proxy_url(base, url);
            match self
                .fetch_with_timeout(&proxied, url, PROXY_TIMEOUT, AcquisitionMethod::Proxy)
                .await
            {
                Ok(entry) => return Ok(entry),
                Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                Err(e) => last_error = Some(e),
            }
        }

        match self
            .fetch_with_timeout(url, url, DIRECT_TIMEOUT, AcquisitionMethod::Direct)
            .await
        {
            Ok(entry) => return Ok(entry),
            Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
            Err(e) => last_error = Some(e),
        }

        if let Some(base) = &self.config.relay_base {
            let relayed = relay_url(base, url);
            match self
                .fetch_with_timeout(&relayed, url, RELAY_TIMEOUT, AcquisitionMethod::Relay)
                .await
            {
                Ok(entry) => return Ok(entry),
                Err(SheetError::Cancelled) => return Err(SheetError::Cancelled),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| SheetError::Acquisition {
            url: url.to_string(),
            reason: "no strategy available".to_string(),
        }))
    }

    /// One bounded network attempt. A timeout aborts only this attempt;
    /// strategy fallback continues.
    async fn fetch_with_timeout(
        &self,
        fetch_url: &str,
        original_url: &str,
        deadline: Duration,
        method: AcquisitionMethod,
    ) -> Result<ImageCacheEntry> {
        self.cancel.check()?;
        self.cache.record_attempt();

        let request = async {
            let response = self.client.get(fetch_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SheetError::Acquisition {
                    url: original_url.to_string(),
                    reason: format!("upstream returned {}", status),
                });
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let bytes = response.bytes().await?.to_vec();
            if bytes.len() < MIN_IMAGE_BYTES {
                return Err(too_small(original_url, bytes.len()));
            }
            Ok(entry(bytes, content_type, method))
        };

        match tokio::time::timeout(deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(SheetError::Timeout {
                url: original_url.to_string(),
                seconds: deadline.as_secs(),
            }),
        }
    }
}

fn entry(
    bytes: Vec<u8>,
    content_type: Option<String>,
    method: AcquisitionMethod,
) -> ImageCacheEntry {
    ImageCacheEntry {
        bytes,
        content_type,
        method,
        fetched_at: chrono::Utc::now(),
    }
}

fn too_small(url: &str, len: usize) -> SheetError {
    SheetError::Acquisition {
        url: url.to_string(),
        reason: format!("body too small to be an image ({} bytes)", len),
    }
}

/// `{base}/image-proxy?url=<percent-encoded absolute URL>`.
pub fn proxy_url(base: &str, target: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.set_path("/image-proxy");
            url.query_pairs_mut().clear().append_pair("url", target);
            url.to_string()
        }
        Err(_) => format!(
            "{}/image-proxy?url={}",
            base.trim_end_matches('/'),
            url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
        ),
    }
}

/// Legacy relays take the raw target appended to their base path.
fn relay_url(base: &str, target: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), target)
}

/// Directory of pre-downloaded images keyed by the URL's file name.
pub struct DirImageSource {
    dir: std::path::PathBuf,
}

impl DirImageSource {
    pub fn new(dir: std::path::PathBuf) -> Self {
        Self { dir }
    }

    fn file_name_of(url: &str) -> Option<String> {
        let name = match Url::parse(url) {
            Ok(parsed) => parsed
                .path_segments()
                .and_then(|segments| segments.last().map(str::to_string)),
            Err(_) => url.rsplit('/').next().map(str::to_string),
        }?;
        // Refuse anything that could escape the directory.
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return None;
        }
        Some(name)
    }
}

#[async_trait::async_trait]
impl LocalImageSource for DirImageSource {
    async fn bytes_for(&self, url: &str) -> Option<Vec<u8>> {
        let name = Self::file_name_of(url)?;
        tokio::fs::read(self.dir.join(name)).await.ok()
    }
}
