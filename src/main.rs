use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vote_booth::{broadcast, cli::Cli, server::Server, store::VoteStore};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.tcp_port)))
        .await
        .context("failed to bind tcp listener")?;

    let results = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .context("failed to bind udp socket")?;
    results
        .connect(SocketAddr::from((Ipv4Addr::LOCALHOST, cli.udp_port)))
        .await
        .context("failed to set udp result destination")?;

    let store = Arc::new(VoteStore::new());
    let shutdown = CancellationToken::new();
    spawn_interrupt_watcher(shutdown.clone());

    let server = Server::new(listener, Arc::clone(&store));
    info!("listening on {}", server.local_addr()?);
    info!("announcing results to 127.0.0.1:{}", cli.udp_port);

    let broadcaster = tokio::spawn(broadcast::run(Arc::clone(&store), results, shutdown.clone()));

    server.run(shutdown).await?;

    // Both tasks observe the token before the process lets its sockets go.
    match broadcaster.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!("result broadcaster failed: {error:?}"),
        Err(error) => warn!(?error, "result broadcaster panicked"),
    }

    info!("shutdown complete");
    Ok(())
}

fn spawn_interrupt_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to install interrupt handler");
            return;
        }
        info!("interrupt received, shutting down");
        shutdown.cancel();
    });
}
