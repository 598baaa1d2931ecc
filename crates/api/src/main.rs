use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use document_export_api::app::{create_app, AppState};
use document_export_api::config::Config;
use document_export_api::jobs::{
    ExportCleanupJob, JobScheduler, PoolMetricsJob, StaleExportSweepJob,
};
use document_export_api::middleware;
use document_export_api::services::{
    build_file_store, ArchiveStore, ExportCleanupService, ExportService,
};
use persistence::repositories::{DocumentRepository, ExportJobRepository};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!("Starting document export service v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.pool_config()).await?;
    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;

    tokio::fs::create_dir_all(&config.export.archive_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create archive directory {}",
                config.export.archive_dir.display()
            )
        })?;

    let job_repository = Arc::new(ExportJobRepository::new(pool.clone()));
    let catalog = Arc::new(DocumentRepository::new(pool.clone()));
    let file_store = build_file_store(&config.storage)?;
    info!(provider = file_store.backend(), "Document storage configured");

    let exports = Arc::new(ExportService::new(
        job_repository.clone(),
        catalog,
        file_store,
        &config.export,
    ));

    let scheduler_config = config.scheduler.clone();
    let mut scheduler = JobScheduler::new(Duration::from_secs(scheduler_config.jitter_secs));
    if scheduler_config.enabled {
        scheduler.register(StaleExportSweepJob::new(
            Arc::clone(&exports),
            scheduler_config.stale_sweep_interval_secs,
        ));
        scheduler.register(ExportCleanupJob::new(
            Arc::new(ExportCleanupService::new(
                job_repository,
                ArchiveStore::new(config.export.archive_dir.clone()),
            )),
            scheduler_config.cleanup_interval_secs,
        ));
        scheduler.register(PoolMetricsJob::new(pool.clone()));
        scheduler.start();
    } else {
        warn!("Background scheduler disabled; stale and expired exports will not be swept");
    }

    let addr = config.socket_addr()?;
    let app = create_app(AppState {
        pool,
        config: Arc::new(config),
        exports: Arc::clone(&exports),
    });

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(scheduler_config.shutdown_timeout_secs);
    scheduler.shutdown();
    scheduler.wait_for_shutdown(grace).await;

    if tokio::time::timeout(grace, exports.shutdown()).await.is_err() {
        warn!("Export workers did not stop within {:?}", grace);
    }

    info!("Shutdown complete");
    Ok(())
}
