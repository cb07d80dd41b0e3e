use crate::utils::error::{Result, SheetError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative cancellation flag. Cloned into every component at
/// engine construction and polled at suspension points: batch boundaries,
/// before each fetch, before each embed.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The distinguished abort condition. Callers treat it as a clean
    /// stop, never as a failure.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SheetError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(signal.check().is_ok());
        clone.cancel();
        assert!(signal.is_cancelled());
        assert!(matches!(signal.check(), Err(SheetError::Cancelled)));
    }
}
