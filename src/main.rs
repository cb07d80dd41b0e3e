use clap::Parser;
use proxysheet::core::acquire::{AcquireConfig, DirImageSource};
use proxysheet::core::deliver;
use proxysheet::domain::ports::LocalImageSource;
use proxysheet::utils::error::FailureClass;
use proxysheet::utils::{logger, validation::Validate};
use proxysheet::{CancelSignal, CardRecord, CliConfig, EngineConfig, PrintSettings, ProxySheetEngine};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    logger::init_cli_logger(config.verbose);

    tracing::info!("Starting proxysheet CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let settings = match &config.settings {
        Some(path) => PrintSettings::from_file(path)?,
        None => PrintSettings::default(),
    };

    let records: Vec<CardRecord> = serde_json::from_str(&std::fs::read_to_string(&config.cards)?)?;
    tracing::info!("📋 Loaded {} card records", records.len());

    let local_source: Option<Arc<dyn LocalImageSource>> = config
        .local_images
        .clone()
        .map(|dir| Arc::new(DirImageSource::new(dir)) as Arc<dyn LocalImageSource>);

    let engine_config = EngineConfig {
        origin: config.origin.clone(),
        acquire: AcquireConfig {
            proxy_base: config.proxy_base.clone(),
            relay_base: config.relay_base.clone(),
            concurrent_requests: config.concurrent_requests,
        },
    };

    let cancel = CancelSignal::new();
    let engine = ProxySheetEngine::new(settings, engine_config, cancel.clone(), local_source);

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("⚠️  Ctrl-C received, cancelling");
                cancel.cancel();
            }
        });
    }

    let result = engine
        .generate(&records, &|p| {
            tracing::info!("[{}/{}] {}", p.current, p.total, p.message);
        })
        .await;

    match result {
        Ok(pdf) => {
            let filename = config
                .output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "proxysheet.pdf".to_string());
            let stages = deliver::default_stages(&config.output);
            let outcome = deliver::deliver(&pdf, &filename, &stages)?;
            tracing::info!("✅ Proxy sheet generated successfully!");
            println!("✅ Proxy sheet generated successfully!");
            println!("📁 Output saved to: {}", outcome.location.display());
        }
        Err(e) => {
            tracing::error!("❌ Generation failed: {} (Class: {:?})", e, e.classify());
            eprintln!("❌ {}", e.user_friendly_message());

            let exit_code = match e.classify() {
                FailureClass::Cancelled => 130,
                FailureClass::Network => 2,
                FailureClass::Memory => 3,
                FailureClass::Generic => 1,
            };
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
