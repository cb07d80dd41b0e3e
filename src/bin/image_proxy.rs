use clap::Parser;
use proxysheet::server::{self, DEFAULT_ALLOWED_HOSTS};
use proxysheet::utils::logger;

#[derive(Debug, Parser)]
#[command(name = "image-proxy")]
#[command(about = "Same-origin proxy for card images, with permissive CORS")]
struct ServerConfig {
    #[arg(long, default_value_t = 8017)]
    port: u16,

    /// Hostnames the proxy may fetch from; repeat the flag to add more.
    /// Subdomains of an allowed host are allowed too.
    #[arg(long = "allow-host")]
    allow_hosts: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    logger::init_server_logger();

    let allowed = if config.allow_hosts.is_empty() {
        DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect()
    } else {
        config.allow_hosts.clone()
    };
    tracing::info!("allowed upstream hosts: {:?}", allowed);

    server::run(config.port, allowed).await?;
    Ok(())
}
