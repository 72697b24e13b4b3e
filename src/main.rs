//! Chain watcher - host entry point.
//!
//! Reads the watcher options from the environment, runs one watcher until
//! Ctrl+C, and prints each emitted record as a JSON line on stdout.

use tracing::{error, info, warn};

use chain_watcher::events::vocabulary;
use chain_watcher::supervisor::{WatcherConfig, WatcherSupervisor};
use chain_watcher::utils::init_from_env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    init_from_env();

    let config = WatcherConfig::from_env();
    info!("Chain watcher [{}] for {}", config.namespace, config.url.trim());
    match config.address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => info!("Watching address {}", address),
        _ => info!("No address configured, balance polling disabled"),
    }
    for descriptor in vocabulary() {
        info!("Declares event {}: {}", descriptor.name, descriptor.description);
    }

    let (sink, mut records) = tokio::sync::mpsc::unbounded_channel();
    let supervisor = WatcherSupervisor::new(config, sink);
    let stop = supervisor.shutdown_token();

    let printer = tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            match serde_json::to_string(&record) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode record: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                stop.cancel();
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    let reason = supervisor.run().await;
    // The supervisor held the only sink sender; the printer drains and exits.
    let _ = printer.await;

    if reason.is_ok() {
        info!("Shut down cleanly");
        Ok(())
    } else {
        Err(anyhow::anyhow!("watcher stopped: {}", reason))
    }
}
