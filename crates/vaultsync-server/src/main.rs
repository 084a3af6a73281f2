mod auth;
mod config;
mod error;
mod maintenance;
mod routes;
mod scheduler;
mod session;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use tokio_util::sync::CancellationToken;
use vaultsync_core::{HistoryWorker, SessionHub, Store, SyncEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vaultsync_server=info".parse()?)
                .add_directive("vaultsync_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting vaultsync-server with config: {:?}", config);

    let store = Store::open_path(&config.database_path).await?;
    let engine_config = Arc::new(config.engine_config());
    let shutdown = CancellationToken::new();

    let (history, history_task) =
        HistoryWorker::spawn(store.clone(), Arc::clone(&engine_config), shutdown.clone());
    let hub = Arc::new(SessionHub::new(
        engine_config.session_queue_capacity,
        engine_config.broadcast_retries,
    ));
    let engine = SyncEngine::new(store.clone(), hub, history.clone(), engine_config);

    let policy = config.retention_policy();
    let cleanup_task = scheduler::spawn_periodic(
        "maintenance",
        config.cleanup_interval,
        shutdown.clone(),
        move || {
            let store = store.clone();
            let history = history.clone();
            async move {
                match maintenance::run(&store, &history, policy).await {
                    Ok(report) => tracing::info!(
                        pruned_versions = report.pruned_versions,
                        purged_notes = report.purged_notes,
                        purged_folders = report.purged_folders,
                        "Maintenance pass finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Maintenance pass failed"),
                }
            }
        },
    );

    let bind_addr = config.bind_addr.clone();
    let router = app_router(AppState::new(config, engine, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("vaultsync-server listening on {}", bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = cleanup_task.await;
    // Flushes pending snapshots before the process exits.
    let _ = history_task.await;
    tracing::info!("vaultsync-server stopped");
    Ok(())
}
