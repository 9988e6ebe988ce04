/// Entry point for a single cluster node.
///
/// Reads its address, view, and replication factor from the environment
/// (see [`casa_kvs::NodeConfig`]), binds the HTTP API on its own address,
/// and starts one gossip task per peer in its bucket. Shuts down cleanly
/// on SIGINT/SIGTERM, draining the gossip tasks before the process exits.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use casa_kvs::{Distributor, NodeConfig, View};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    casa_kvs::init_logging();

    let config = NodeConfig::from_env()?;
    info!(address = %config.address, view = ?config.view, repl_factor = config.repl_factor, "starting node");

    let view = View::new(config.view.clone(), config.address.clone(), config.repl_factor)?;
    let distributor = Arc::new(Distributor::new(view, Duration::from_secs(config.gossip_interval_secs)));
    distributor.rebuild_gossip_jobs().await;

    let addr: SocketAddr = config
        .address
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid address {}: {e}", config.address))?;

    let app = casa_kvs::http::router(Arc::clone(&distributor));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    distributor.stop_gossip();
    info!("node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
