//! Vigil node daemon.
//!
//! Runs the full per-node stack: health monitor, failover controller,
//! topology forwarder and the HTTP control plane, wired to a coordination
//! store and a command-driven database engine. Configuration comes from the
//! environment:
//!
//! - `VIGIL_MEMBER_ID` (required), `VIGIL_DB_HOST`, `VIGIL_DB_PORT`
//! - `VIGIL_STATUS_CMD`, `VIGIL_PROMOTE_CMD`, `VIGIL_DEMOTE_CMD` (required)
//! - `VIGIL_API_ADDR` for the control API listener
//! - cluster tuning via `VIGIL_QUORUM_SIZE`, `VIGIL_LEASE_TTL_MS`,
//!   `VIGIL_POLL_INTERVAL_MS`, `VIGIL_LEASE_RENEW_TIMEOUT_MS`,
//!   `VIGIL_MAX_ALLOWED_LAG_BYTES`

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_api::AppState;
use vigil_core::engine::DatabaseEngine;
use vigil_core::store::CoordinationStore;
use vigil_core::{ClusterConfig, MemberId};
use vigil_ha::{
    spawn_topology_forwarder, CommandEngine, CommandSpec, EngineQuery, FailoverController,
    HealthMonitor, NodeIdentity, NotificationBus, TopologyManager,
};
use vigil_store::{CoordClient, MemoryStore};

fn required_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn engine_from_env() -> anyhow::Result<Arc<dyn DatabaseEngine>> {
    let status = CommandSpec::parse(&required_env("VIGIL_STATUS_CMD")?)
        .context("VIGIL_STATUS_CMD is not a valid command line")?;
    let promote = CommandSpec::parse(&required_env("VIGIL_PROMOTE_CMD")?)
        .context("VIGIL_PROMOTE_CMD is not a valid command line")?;
    let demote = CommandSpec::parse(&required_env("VIGIL_DEMOTE_CMD")?)
        .context("VIGIL_DEMOTE_CMD is not a valid command line")?;
    Ok(Arc::new(CommandEngine::new(status, promote, demote)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClusterConfig::from_env().context("invalid cluster configuration")?;
    let identity = NodeIdentity {
        id: MemberId::new(required_env("VIGIL_MEMBER_ID")?),
        host: std::env::var("VIGIL_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("VIGIL_DB_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .context("VIGIL_DB_PORT must be a port number")?,
    };
    let api_addr =
        std::env::var("VIGIL_API_ADDR").unwrap_or_else(|_| "0.0.0.0:7331".to_string());

    info!(member_id = %identity.id, "starting vigil node");

    // The in-memory store serves single-process deployments and testing; a
    // networked backend plugs in through the same trait.
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let client = CoordClient::new(store);
    let engine = engine_from_env()?;

    let topology = Arc::new(TopologyManager::new(client.clone(), config.clone()));
    let bus = Arc::new(NotificationBus::new());
    let monitor = Arc::new(HealthMonitor::new(
        identity.clone(),
        Arc::new(EngineQuery::new(engine.clone())),
        client.clone(),
        config.clone(),
    ));
    let controller = Arc::new(FailoverController::new(
        identity.id.clone(),
        client.clone(),
        topology.clone(),
        engine,
        config,
        bus.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = monitor.spawn(shutdown_rx.clone());
    let controller_task = controller.clone().spawn(shutdown_rx.clone());
    let forwarder_task = spawn_topology_forwarder(client.clone(), bus, shutdown_rx.clone());

    let app = vigil_api::router(AppState {
        controller,
        topology,
        client,
    });
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("binding control api to {api_addr}"))?;
    info!(%api_addr, "control api listening");

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // The controller resigns on the way out if it holds the lease.
    let _ = controller_task.await;
    let _ = monitor_task.await;
    let _ = forwarder_task.await;
    let _ = server.await;

    info!("vigil node stopped");
    Ok(())
}
