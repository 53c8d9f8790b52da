//! Catalog provider.
//!
//! Watches a Consul catalog and publishes routing configuration for a reverse
//! proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Consul HTTP API
//!           │
//!           ▼
//!   ┌──────────────────┐   services / instances   ┌───────────────────┐
//!   │ registry::consul │ ───────────────────────▶ │  registry::watch  │
//!   └──────────────────┘                          │  catalog loop     │
//!                                                 │  service watches  │
//!                                                 │  publisher        │
//!                                                 └─────────┬─────────┘
//!   ┌──────────────────┐   [catalog] hot reload             │ snapshot
//!   │ config::watcher  │ ─────────────────────────▶ provider::builder
//!   └──────────────────┘                                    │
//!                                                           ▼
//!                                              ConfigMessage (JSON)
//!                                              → output file / stdout
//! ```

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use catalog_provider::config::watcher::ConfigWatcher;
use catalog_provider::config::{load_config, OutputConfig, ProviderConfig};
use catalog_provider::lifecycle::{signals, Shutdown};
use catalog_provider::observability::{logging, metrics};
use catalog_provider::provider::{CatalogProvider, ConfigMessage};
use catalog_provider::registry::consul::ConsulClient;
use catalog_provider::registry::watch::{CatalogWatcher, RetryPolicy};
use catalog_provider::registry::ServiceRecord;

#[derive(Parser)]
#[command(name = "catalog-provider")]
#[command(about = "Routing configuration from a service catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the registry and publish configuration on every change
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Build configuration once from a JSON catalog dump and print it
    Render {
        #[arg(short, long)]
        config: PathBuf,

        /// JSON array of services with their attributes and instances
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::Render { config, catalog } => render(&config, &catalog),
    }
}

async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        config = ?config_path,
        endpoint = %config.registry.endpoint,
        domain = %config.catalog.domain,
        prefix = %config.catalog.prefix,
        "catalog-provider v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let client = ConsulClient::new(&config.registry)?;
    let provider = CatalogProvider::new(&config.catalog)?;
    let retry = RetryPolicy {
        base_delay_ms: config.registry.retry_base_delay_ms,
        max_delay_ms: config.registry.retry_max_delay_ms,
    };
    let watcher = CatalogWatcher::new(client, provider, retry);

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    // Hot reload of the [catalog] section.
    let (config_watcher, mut reload_rx) = ConfigWatcher::new(config_path);
    let _watch_handle = match config_watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    let handle = watcher.provider_handle();
    let reload_shutdown = shutdown.clone();
    let mut current_catalog = config.catalog.clone();
    tokio::spawn(async move {
        loop {
            let new_config: ProviderConfig = tokio::select! {
                _ = reload_shutdown.cancelled() => break,
                received = reload_rx.recv() => match received {
                    Some(config) => config,
                    None => break,
                },
            };
            if new_config.catalog == current_catalog {
                continue;
            }
            match handle.reload(&new_config.catalog) {
                Ok(()) => current_catalog = new_config.catalog,
                Err(e) => tracing::error!(error = %e, "Rejected catalog settings, keeping current"),
            }
        }
    });

    let (update_tx, mut update_rx) = mpsc::channel::<ConfigMessage>(16);
    let output = config.output.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = update_rx.recv().await {
            if let Err(e) = write_message(&output, &message) {
                tracing::error!(error = %e, "Failed to write configuration");
            }
        }
    });

    watcher.run(shutdown.child(), update_tx).await;
    shutdown.trigger();
    let _ = writer.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn render(config_path: &Path, catalog_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability);

    let services: Vec<ServiceRecord> = serde_json::from_str(&fs::read_to_string(catalog_path)?)?;
    let provider = CatalogProvider::new(&config.catalog)?;
    let message = ConfigMessage::new(provider.build_config(&services));

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &message)?;
    writeln!(stdout)?;
    Ok(())
}

/// Write `message` as pretty JSON. Files are replaced atomically.
fn write_message(output: &OutputConfig, message: &ConfigMessage) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(message)?;

    match &output.path {
        Some(path) => {
            let path = Path::new(path);
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(".tmp");
            fs::write(&tmp, &json)?;
            fs::rename(&tmp, path)?;
            tracing::info!(path = ?path, bytes = json.len(), "Configuration written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&json)?;
            writeln!(stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
