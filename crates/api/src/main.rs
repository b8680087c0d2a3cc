use anyhow::{Context, Result};
use domain::services::{ExportJobStore, JournalReader};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use journal_export_api::{
    app,
    config::{self, Backend},
    jobs::{ExportRetentionJob, JobScheduler, PoolMetricsJob},
    middleware,
    services::ExportService,
};
use persistence::{InMemoryExportJobStore, MemoryJournalReader, PgExportJobStore, PgJournalReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging);

    info!("Starting Journal Export API v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = middleware::init_metrics() {
        warn!("Prometheus recorder not installed: {}", e);
    }

    // Postgres only when a backend needs it
    let pool = if config.needs_database() {
        let pool = persistence::db::create_pool(&config.database.to_pool_config())
            .await
            .context("failed to connect to database")?;
        info!("Running database migrations...");
        persistence::db::run_migrations(&pool).await?;
        info!("Migrations completed");
        Some(pool)
    } else {
        None
    };

    let store: Arc<dyn ExportJobStore> = match (config.exports.store, &pool) {
        (Backend::Postgres, Some(pool)) => Arc::new(PgExportJobStore::new(pool.clone())),
        _ => Arc::new(InMemoryExportJobStore::new()),
    };
    let reader: Arc<dyn JournalReader> = match (config.exports.journal, &pool) {
        (Backend::Postgres, Some(pool)) => Arc::new(PgJournalReader::new(pool.clone())),
        _ => {
            warn!("Using the in-memory journal reader; exports will contain no rows");
            Arc::new(MemoryJournalReader::new())
        }
    };

    info!(
        store = %store.mode(),
        max_concurrency = config.exports.max_concurrency,
        max_active_per_user = config.exports.max_active_per_user,
        "Export service configured"
    );

    let exports = Arc::new(ExportService::new(
        Arc::clone(&store),
        reader,
        &config.exports,
    ));

    let mut scheduler = JobScheduler::new();
    scheduler.register(ExportRetentionJob::new(
        Arc::clone(&store),
        config.retention.clone(),
    ));
    scheduler.register(PoolMetricsJob::new(
        exports.workers().clone(),
        pool.clone(),
    ));
    scheduler.start();

    let addr = config.socket_addr()?;
    let state = app::AppState::new(config, exports, pool).context("invalid JWT key pair")?;
    let app = app::create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received");
}
