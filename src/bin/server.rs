//! attestmesh node binary.
//!
//! Wires the ledger, directory, bus, and scheduler together and serves
//! the inbound mesh endpoint.
//!
//! # Environment Variables
//!
//! - `ATTESTMESH_CONFIG` — Path to the YAML configuration (defaults in
//!   code when unset)
//! - `ATTESTMESH_DB`     — Path to the SQLite store (in-memory state
//!   only when unset)
//! - `RUST_LOG`          — Tracing filter (default: "info")

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use attestmesh::{
    server::{app_router, AppState},
    AgentDirectory, CommitLedger, Config, HttpTransport, MessageBus, PeerTransport, SqliteStore,
    SyncScheduler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,attestmesh=debug".into()),
        )
        .init();

    let config = match std::env::var("ATTESTMESH_CONFIG") {
        Ok(path) => Config::from_yaml_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        Err(_) => Config::default(),
    };

    let node_id = config
        .mesh
        .node_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::info!(%node_id, "starting attestmesh node");

    let transport: Arc<dyn PeerTransport> = Arc::new(HttpTransport::new(
        &config.mesh.communication_protocol,
        config.mesh.signing_key.clone(),
    )?);

    let store = match std::env::var("ATTESTMESH_DB") {
        Ok(path) => {
            tracing::info!(%path, "opening durable store");
            Some(Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("failed to open store at {}", path))?,
            ))
        }
        Err(_) => {
            tracing::warn!("ATTESTMESH_DB not set, state will not survive restarts");
            None
        }
    };

    let (ledger, directory) = match store {
        Some(store) => (
            Arc::new(CommitLedger::with_store(
                config.ledger.clone(),
                node_id.clone(),
                transport.clone(),
                store.clone(),
            )?),
            Arc::new(AgentDirectory::with_store(
                config.mesh.clone(),
                node_id.clone(),
                transport.clone(),
                store,
            )?),
        ),
        None => (
            Arc::new(CommitLedger::new(
                config.ledger.clone(),
                node_id.clone(),
                transport.clone(),
            )),
            Arc::new(AgentDirectory::new(
                config.mesh.clone(),
                node_id.clone(),
                transport.clone(),
            )),
        ),
    };

    let bus = Arc::new(MessageBus::new(
        config.mesh.clone(),
        node_id,
        directory.clone(),
        ledger.clone(),
        transport,
    ));

    let scheduler = SyncScheduler::start(
        Duration::from_secs(config.sync_interval_secs),
        directory,
        ledger,
    );

    let app = app_router(AppState { bus });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "serving mesh endpoint");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    // Let any in-flight tick finish before exiting.
    scheduler.stop().await;
    tracing::info!("attestmesh node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
