use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Optional source of already-rendered image bytes, the non-browser analog
/// of reading a loaded `<img>` element back from the page. A build without
/// one simply skips the strategy.
#[async_trait]
pub trait LocalImageSource: Send + Sync {
    async fn bytes_for(&self, url: &str) -> Option<Vec<u8>>;
}

/// One mechanism for handing the finished PDF to the user. Stages are
/// tried in order; a failing stage falls through to the next.
pub trait DeliveryStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf>;
}
