//! `pgsourced run` — assemble and run every subsystem in one process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use pgsource_core::PgSourceConfig;
use pgsource_core::config::DATABASE_URL_ENV;
use pgsource_reconciler::{
    Controller, DependencyOrchestrator, ReconcileEngine, ResourceStore, StoreBindingManager,
    StoreWorkloadScheduler,
};
use pgsource_schema::{PgDatabase, SchemaMutator};
use pgsource_state::StateStore;

fn load_config(
    path: Option<PathBuf>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<PgSourceConfig> {
    let mut config = match &path {
        Some(path) => PgSourceConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PgSourceConfig::default(),
    }
    .with_env_overrides();

    if let Some(port) = port {
        config.api.port = port;
    }
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir);
    }
    Ok(config)
}

pub async fn run(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("pgsource daemon starting");

    let config = load_config(config_path, port, data_dir)?;
    let url = config.database.url.clone().with_context(|| {
        format!("no database url: set database.url or {DATABASE_URL_ENV}")
    })?;
    let image = config
        .receiver
        .image
        .clone()
        .context("no receiver image: set receiver.image")?;

    // ── Initialize subsystems ──────────────────────────────────

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("pgsource.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let database = PgDatabase::connect_lazy(&url, &config.database)?;
    info!(
        max_connections = config.database.max_connections,
        "database pool configured"
    );

    let store: Arc<dyn ResourceStore> = Arc::new(state.clone());
    let engine = ReconcileEngine::new(
        store.clone(),
        SchemaMutator::new(Arc::new(database)),
        DependencyOrchestrator::new(
            Arc::new(StoreWorkloadScheduler::new(state.clone())),
            Arc::new(StoreBindingManager::new(state.clone())),
            image,
        ),
    );
    let controller = Controller::new(store, engine, config.controller.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = pgsource_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Err(e) = controller_handle.await {
        error!(error = %e, "controller task failed");
    }

    info!("pgsource daemon stopped");
    Ok(())
}
