use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waybill_core::{
    load_config, validate_config, JobScheduler, ShipmentStore, SqliteJobQueue,
    SqliteShipmentStore, TrackingService, TrackingWorker,
};
use waybill_server::api::create_router;
use waybill_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Waybill {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("WAYBILL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Shipments and jobs share one database file
    let shipment_store: Arc<dyn ShipmentStore> = Arc::new(
        SqliteShipmentStore::new(&config.database.path)
            .context("Failed to create shipment store")?,
    );
    info!("Shipment store initialized");

    let job_queue = Arc::new(
        SqliteJobQueue::new(&config.database.path)
            .context("Failed to create job queue")?
            .with_max_attempts(config.tracking.max_attempts),
    );
    info!("Job queue initialized");

    let tracking = Arc::new(TrackingService::new(
        Arc::clone(&shipment_store),
        Arc::clone(&job_queue) as Arc<dyn JobScheduler>,
        config.tracking.clone(),
    ));

    // Create tracking worker if enabled
    let worker = if config.tracking.enabled {
        let worker = TrackingWorker::new(
            config.tracking.clone(),
            Arc::clone(&tracking),
            Arc::clone(&job_queue),
        );
        worker.start().await;
        Some(Arc::new(worker))
    } else {
        info!("Tracking worker disabled in config");
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        shipment_store,
        Arc::clone(&job_queue),
        tracking,
        worker.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Refuse new jobs before draining in-flight steps
    job_queue.close();

    if let Some(ref worker) = worker {
        worker.stop().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
