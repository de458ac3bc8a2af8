//! CollectHub Server: scheduled content collection engine
//!
//! Main entry point that wires all crates together and runs the engine
//! until SIGINT/SIGTERM.

use std::sync::Arc;

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use collecthub_core::config::AppConfig;
use collecthub_core::error::AppError;
use collecthub_database::DatabasePool;
use collecthub_database::repositories::TaskRepository;
use collecthub_worker::jobs::{ArticleFetchUnit, HistoryCleanupUnit};
use collecthub_worker::{JobManager, UnitRegistry};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file, environment overlay, and variables
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("COLLECTHUB_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    let env = std::env::var("COLLECTHUB_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, Some(&env))
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting CollectHub v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Task store ───────────────────────────────────────
    let db = DatabasePool::connect(&config.database).await?;
    collecthub_database::migration::run_migrations(db.pool()).await?;
    let store = Arc::new(TaskRepository::new(db.pool().clone()));

    // ── Step 2: Collection units ─────────────────────────────────
    let units = UnitRegistry::new()
        .with(Arc::new(ArticleFetchUnit::new(&config.collector)?))
        .with(Arc::new(HistoryCleanupUnit::new(
            store.clone(),
            config.scheduler.retention_days,
        )));
    tracing::info!(units = ?units.kinds(), "Collection units registered");

    // ── Step 3: Engine and triggers ──────────────────────────────
    let manager = JobManager::new(config.scheduler.clone(), store, units).await?;
    let count = manager.bootstrap_triggers(&config.triggers).await?;
    tracing::info!(count, "Bootstrap triggers registered");

    if config.scheduler.enabled {
        manager.start().await?;
    } else {
        tracing::warn!("Scheduler disabled by configuration, engine not started");
    }

    // ── Step 4: Run until signalled ──────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let abandoned = manager.shutdown().await?;
    if abandoned > 0 {
        tracing::warn!(abandoned, "Exited with tasks still running");
    }

    db.close().await;
    tracing::info!("CollectHub stopped");
    Ok(())
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
