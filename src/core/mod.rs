pub mod acquire;
pub mod assemble;
pub mod cache;
pub mod cancel;
pub mod deliver;
pub mod engine;
pub mod layout;
pub mod urlnorm;

pub use acquire::{AcquireConfig, ImageAcquirer};
pub use cache::{FailedImageSet, ImageCache};
pub use cancel::CancelSignal;
pub use engine::{EngineConfig, EngineState, ProxySheetEngine};
pub use layout::PageLayout;
