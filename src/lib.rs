pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

pub use config::{CliConfig, PrintSettings};
pub use core::{CancelSignal, EngineConfig, ProxySheetEngine};
pub use domain::model::{CardRecord, GenerationProgress};
pub use utils::error::{Result, SheetError};
