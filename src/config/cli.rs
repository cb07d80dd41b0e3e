use crate::utils::error::Result;
use crate::utils::validation::{validate_positive_number, validate_url, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "proxysheet")]
#[command(about = "Generate a print-ready PDF sheet of trading-card proxies")]
pub struct CliConfig {
    /// JSON file with an array of resolved card records
    #[arg(long)]
    pub cards: PathBuf,

    /// Where to write the finished PDF
    #[arg(long, default_value = "./output/proxysheet.pdf")]
    pub output: PathBuf,

    /// Optional TOML print-settings file (defaults apply otherwise)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Base URL of the same-origin image proxy, e.g. http://localhost:8017
    #[arg(long)]
    pub proxy_base: Option<String>,

    /// Base URL of a third-party CORS relay (legacy last-resort strategy)
    #[arg(long)]
    pub relay_base: Option<String>,

    /// Directory of already-downloaded images, keyed by URL file name
    #[arg(long)]
    pub local_images: Option<PathBuf>,

    /// Site origin used to resolve relative image references
    #[arg(long, default_value = "https://proxysheet.local")]
    pub origin: String,

    #[arg(long, default_value = "4")]
    pub concurrent_requests: usize,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number("concurrent_requests", self.concurrent_requests, 1)?;
        validate_url("origin", &self.origin)?;
        if let Some(proxy_base) = &self.proxy_base {
            validate_url("proxy_base", proxy_base)?;
        }
        if let Some(relay_base) = &self.relay_base {
            validate_url("relay_base", relay_base)?;
        }
        Ok(())
    }
}
