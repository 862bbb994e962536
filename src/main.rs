//! listing-watcher - Poll listing searches and deliver every new listing once
//!
//! This is the main entry point for the listing-watcher application.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use listing_watcher::config::Config;
use listing_watcher::database::SqliteDatabase;
use listing_watcher::dedup::{DedupStore, SeenStore};
use listing_watcher::models::SearchDefinition;
use listing_watcher::otel::{init_tracing, Metrics, OtelProvider};
use listing_watcher::source::HttpSourceFactory;
use listing_watcher::watch::{RetryExecutor, WatchScheduler};

/// listing-watcher - Poll listing searches and deliver every new listing once
#[derive(Parser, Debug)]
#[command(name = "listing-watcher")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "LISTING_WATCHER_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    config.validate()?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        searches = config.searches.len(),
        "Starting listing-watcher"
    );

    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let dedup: Arc<dyn DedupStore> = Arc::new(SeenStore::load(database).await?);

    let searches = config
        .searches
        .iter()
        .map(SearchDefinition::from_config)
        .collect::<Result<Vec<_>, _>>()?;

    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let retry = RetryExecutor::new(config.retry.clone()).with_metrics(Arc::clone(&metrics));
    let sources = Arc::new(HttpSourceFactory::new(config.source.clone()));

    let mut scheduler =
        WatchScheduler::new(config.scheduler.clone(), retry, dedup, sources).with_metrics(metrics);

    // Launching is staggered, so a signal may arrive before every loop runs
    let interrupted = tokio::select! {
        started = scheduler.start(searches) => {
            if started {
                shutdown_signal().await;
            } else {
                warn!("Nothing to do, exiting");
            }
            false
        }
        _ = shutdown_signal() => true,
    };

    if interrupted {
        info!("Shutdown requested while starting search loops");
    }
    scheduler.shutdown().await;

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("listing-watcher shutdown complete");

    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
