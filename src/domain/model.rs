use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved trading-card record. Owned by the caller; the engine only
/// borrows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub name: String,
    /// Image URL candidates, best quality first (full > large > small).
    pub image_urls: Vec<String>,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

/// Which strategy produced the cached bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMethod {
    Cache,
    LocalSource,
    Proxy,
    Direct,
    Relay,
}

#[derive(Debug, Clone)]
pub struct ImageCacheEntry {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub method: AcquisitionMethod,
    pub fetched_at: DateTime<Utc>,
}

/// Progress event passed to the caller's callback. `current` never
/// decreases within a run and stays within `[0, total]`.
#[derive(Debug, Clone)]
pub struct GenerationProgress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

/// Borrowed callbacks are fine; the engine never stores one beyond the
/// call it was passed to.
pub type ProgressFn<'a> = dyn Fn(&GenerationProgress) + Send + Sync + 'a;

/// One occupied slot on a page: an index into the caller's record list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub record: usize,
}

/// Slot assignments for one physical page. Derived per run, never stored.
#[derive(Debug, Clone)]
pub struct PagePlan {
    pub slots: Vec<Slot>,
}

/// Expands each record into `count` single-unit placements, preserving
/// input order.
pub fn expand_placements(records: &[CardRecord]) -> Vec<Slot> {
    let mut slots = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for _ in 0..record.count {
            slots.push(Slot { record: index });
        }
    }
    slots
}

/// Chunks placements into pages of `per_page` slots. The last page may be
/// partially filled.
pub fn paginate(slots: &[Slot], per_page: usize) -> Vec<PagePlan> {
    slots
        .chunks(per_page)
        .map(|chunk| PagePlan {
            slots: chunk.to_vec(),
        })
        .collect()
}
