//! tx-manager daemon.
//!
//! Loads configuration, opens the record store, connects to the configured
//! nodes and runs the Tracker and Node Health Monitor until SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tx_manager::config::{load_config, validate_config, ManagerConfig};
use tx_manager::custody::MasterKey;
use tx_manager::lifecycle::{wait_for_signal, Shutdown};
use tx_manager::nodes::NodeRegistry;
use tx_manager::observability::{logging, metrics};
use tx_manager::{RpcGateway, SqlStore, TransactionManager};

#[derive(Parser)]
#[command(name = "tx-manager")]
#[command(about = "Transaction reliability layer for oracle services", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let config = ManagerConfig::default();
            validate_config(&config).map_err(tx_manager::config::ConfigError::Validation)?;
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "tx-manager starting"
    );
    tracing::info!(
        services = ?config.submission.services,
        endpoints = config.nodes.endpoints.len(),
        tick_interval_secs = config.tracker.interval_secs,
        required_confirmations = config.tracker.required_confirmations,
        max_pending_age_secs = config.tracker.max_pending_age_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store = Arc::new(SqlStore::connect(&config.store).await?);
    tracing::info!(database_url = %config.store.database_url, "Record store connected");

    let master = MasterKey::from_env(&config.custody.master_secret_env)?;
    let registry = Arc::new(NodeRegistry::from_config(&config.nodes));
    let gateway = Arc::new(RpcGateway::new(config.gateway.clone(), registry.clone())?);

    let manager = TransactionManager::new(config, store.clone(), gateway, registry, master);
    let recovered = manager.recover().await?;
    tracing::info!(open = recovered, "Recovered open transactions");

    let shutdown = Shutdown::new();
    let handles = manager.spawn(&shutdown);

    wait_for_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
