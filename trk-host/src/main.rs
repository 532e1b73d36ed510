//! trk-host - local creative-production host
//!
//! Runs background jobs (external audio tools, pipelines) with streamed logs
//! and serves the palette document store with optimistic concurrency.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use trk_common::config::RootFolderInitializer;
use trk_common::events::EventBus;

use trk_host::config::{Args, HostConfig, LoadedConfig};
use trk_host::experiments::ExperimentRegistry;
use trk_host::{build_router, AppState, EVENT_BUS_CAPACITY};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let loaded = LoadedConfig::load(&args).context("Failed to load config file")?;

    // RUST_LOG wins over the [logging] level from the config file
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| loaded.toml.logging.level.as_str().into()),
        )
        .init();

    info!(
        "Starting trk-host v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match (&loaded.source, &loaded.problem) {
        (Some(path), _) => info!("Loaded config from {}", path.display()),
        (None, Some(problem)) => warn!("{}", problem),
        (None, None) => {}
    }

    let config = HostConfig::resolve(&args, loaded.toml)?;

    // Step 1: Root folder layout (trk.db + runs/)
    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    // Step 2: Database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = trk_host::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    // Step 3: Experiments
    let experiments = ExperimentRegistry::from_config(&config.toml)?;
    info!(count = experiments.len(), "Experiments registered");

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(
        db_pool,
        event_bus,
        initializer.runs_path(),
        experiments,
        config.toml.max_concurrent_jobs,
    );
    let app = build_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("trk-host listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
