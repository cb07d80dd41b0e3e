use crate::config::print::{PrintSettings, CARDS_PER_PAGE};
use crate::core::acquire::{AcquireConfig, ImageAcquirer};
use crate::core::assemble::SheetAssembler;
use crate::core::cache::ImageCache;
use crate::core::cancel::CancelSignal;
use crate::core::layout::PageLayout;
use crate::core::urlnorm::normalize_image_url;
use crate::domain::model::{
    expand_placements, paginate, CardRecord, GenerationProgress, ProgressFn,
};
use crate::domain::ports::LocalImageSource;
use crate::utils::error::{Result, SheetError};
use crate::utils::validation::Validate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    LoadingImages,
    Ready,
    Generating,
    Done,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Site origin used to resolve relative image references.
    pub origin: String,
    pub acquire: AcquireConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: "https://proxysheet.local".to_string(),
            acquire: AcquireConfig {
                proxy_base: None,
                relay_base: None,
                concurrent_requests: 4,
            },
        }
    }
}

/// Rewrites component-local progress counts into one monotone global
/// sequence over `[0, total]`. The total grows when a fallback preload
/// round adds work the initial estimate could not know about, so the
/// sequence ends at exactly `(total, total)`.
struct MonotoneProgress<'a> {
    current: AtomicU32,
    total: AtomicU32,
    callback: &'a ProgressFn<'a>,
}

impl<'a> MonotoneProgress<'a> {
    fn new(total: u32, callback: &'a ProgressFn<'a>) -> Self {
        Self {
            current: AtomicU32::new(0),
            total: AtomicU32::new(total),
            callback,
        }
    }

    fn extend(&self, additional: u32) {
        self.total.fetch_add(additional, Ordering::SeqCst);
    }

    fn bump(&self, message: &str) {
        let total = self.total.load(Ordering::SeqCst);
        let current = (self.current.fetch_add(1, Ordering::SeqCst) + 1).min(total);
        (self.callback)(&GenerationProgress {
            current,
            total,
            message: message.to_string(),
        });
    }
}

/// The proxy-print generation engine. Constructed with immutable print
/// settings and a shared cancellation signal; owns its caches for the
/// lifetime of the instance.
pub struct ProxySheetEngine {
    settings: PrintSettings,
    config: EngineConfig,
    acquirer: ImageAcquirer,
    cancel: CancelSignal,
    state: Mutex<EngineState>,
}

impl ProxySheetEngine {
    pub fn new(
        settings: PrintSettings,
        config: EngineConfig,
        cancel: CancelSignal,
        local_source: Option<Arc<dyn LocalImageSource>>,
    ) -> Self {
        Self::with_cache(settings, config, cancel, local_source, ImageCache::new())
    }

    /// Lets a caller share one byte cache across several engine instances
    /// on purpose; nothing is shared implicitly.
    pub fn with_cache(
        settings: PrintSettings,
        config: EngineConfig,
        cancel: CancelSignal,
        local_source: Option<Arc<dyn LocalImageSource>>,
        cache: ImageCache,
    ) -> Self {
        let acquirer = ImageAcquirer::new(
            config.acquire.clone(),
            cache,
            cancel.clone(),
            local_source,
        );
        Self {
            settings,
            config,
            acquirer,
            cancel,
            state: Mutex::new(EngineState::Idle),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquirer(&self) -> &ImageAcquirer {
        &self.acquirer
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Generates the full proxy sheet. Progress fires at least once per
    /// image and once per page. Per-image and per-page failures degrade
    /// to placeholders; only cancellation and document serialization
    /// failure abort the run.
    pub async fn generate(
        &self,
        records: &[CardRecord],
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        let result = self.generate_inner(records, progress).await;
        match &result {
            Ok(_) => self.set_state(EngineState::Done),
            // Reset transition: back to Idle on error or cancellation.
            Err(_) => self.set_state(EngineState::Idle),
        }
        result
    }

    async fn generate_inner(
        &self,
        records: &[CardRecord],
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        // Configuration errors surface before any network work.
        self.settings.validate()?;
        let layout = PageLayout::compute(&self.settings)?;

        let placements = expand_placements(records);
        if placements.is_empty() {
            return Err(SheetError::Config {
                message: "no card placements: every record has count 0 or the list is empty"
                    .to_string(),
            });
        }
        let pages = paginate(&placements, CARDS_PER_PAGE);

        let resolved: Vec<Vec<String>> = records
            .iter()
            .map(|record| {
                record
                    .image_urls
                    .iter()
                    .map(|reference| normalize_image_url(reference, &self.config.origin))
                    .collect()
            })
            .collect();

        let preload_total = unique_candidates(&resolved, 0).len();
        let back_pages = if self.settings.back_pages {
            pages.len()
        } else {
            0
        };
        let total = (preload_total + pages.len() + back_pages) as u32;
        let tracker = MonotoneProgress::new(total, progress);

        // Preload everything before the first page is drawn; assembly
        // never starts with the pipeline still in flight.
        self.set_state(EngineState::LoadingImages);
        self.acquirer.reset_run().await;
        self.preload_rounds(&resolved, &tracker).await?;

        self.set_state(EngineState::Ready);
        self.cancel.check()?;

        self.set_state(EngineState::Generating);
        let assembler = SheetAssembler::new(&self.settings, &layout, self.cancel.clone());
        let adapter = |p: &GenerationProgress| tracker.bump(&p.message);
        let bytes = assembler
            .build(records, &resolved, &pages, &self.acquirer, &adapter)
            .await?;

        tracing::info!(
            "✅ sheet complete: {} pages, {} bytes, {} images failed",
            pages.len() + back_pages,
            bytes.len(),
            self.acquirer.failed().len().await
        );
        Ok(bytes)
    }

    /// Candidate ranks are preloaded in waves: best URLs first, the next
    /// rank only for records that still have nothing cached. Keeps the
    /// full > large > small priority without serializing per record.
    async fn preload_rounds(
        &self,
        resolved: &[Vec<String>],
        tracker: &MonotoneProgress<'_>,
    ) -> Result<()> {
        let adapter = |p: &GenerationProgress| tracker.bump(&p.message);
        let max_rank = resolved.iter().map(|c| c.len()).max().unwrap_or(0);

        for rank in 0..max_rank {
            let mut round = Vec::new();
            let mut seen = HashSet::new();
            for candidates in resolved {
                if rank >= candidates.len() || self.any_cached(candidates).await {
                    continue;
                }
                let url = &candidates[rank];
                if seen.insert(url.clone()) {
                    round.push(url.clone());
                }
            }
            if round.is_empty() {
                break;
            }
            // Fallback work the rank-0 estimate could not foresee.
            if rank > 0 {
                tracker.extend(round.len() as u32);
            }
            self.acquirer.preload(&round, &adapter).await?;
        }
        Ok(())
    }

    async fn any_cached(&self, candidates: &[String]) -> bool {
        for url in candidates {
            if self.acquirer.cache().get(url).await.is_some() {
                return true;
            }
        }
        false
    }
}

fn unique_candidates(resolved: &[Vec<String>], rank: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for candidates in resolved {
        if let Some(url) = candidates.get(rank) {
            if seen.insert(url.clone()) {
                urls.push(url.clone());
            }
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_candidates_deduplicates_preserving_order() {
        let resolved = vec![
            vec!["https://a/1.png".to_string()],
            vec!["https://a/2.png".to_string()],
            vec!["https://a/1.png".to_string()],
        ];
        let urls = unique_candidates(&resolved, 0);
        assert_eq!(urls, vec!["https://a/1.png", "https://a/2.png"]);
    }

    #[tokio::test]
    async fn oversized_layout_fails_before_any_network() {
        let settings = PrintSettings {
            bleed_mm: 4.0,
            ..Default::default()
        };
        let engine = ProxySheetEngine::new(
            settings,
            EngineConfig::default(),
            CancelSignal::new(),
            None,
        );
        let records = vec![CardRecord {
            id: "c1".into(),
            name: "Test".into(),
            image_urls: vec!["https://img.example.com/c1.png".into()],
            count: 1,
        }];

        let err = engine.generate(&records, &|_| {}).await.unwrap_err();
        assert!(matches!(err, SheetError::Layout { .. }));
        assert_eq!(engine.acquirer().cache().attempt_count(), 0);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn empty_deck_is_a_configuration_error() {
        let engine = ProxySheetEngine::new(
            PrintSettings::default(),
            EngineConfig::default(),
            CancelSignal::new(),
            None,
        );
        let err = engine.generate(&[], &|_| {}).await.unwrap_err();
        assert!(matches!(err, SheetError::Config { .. }));
    }
}
