use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chain::{BasicValidator, BlockChain, ChainConfig, MemoryChain};
use clap::Parser;
use metrics::{Metrics, server::MetricsServerConfig};
use networking::network::{NetworkService, NetworkServiceConfig};
use networking::sync::{SyncConfig, SyncMode, SyncService};
use networking::{Handler, HandlerConfig};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    address: IpAddr,

    #[arg(short, long, default_value_t = 30303)]
    port: u16,

    /// Peer socket addresses, or YAML files listing them.
    #[arg(long)]
    peers: Vec<String>,

    #[arg(long, default_value_t = chain::config::DEVNET_NETWORK_ID)]
    network_id: u64,

    /// full, snap or light.
    #[arg(long, default_value = "snap")]
    sync_mode: SyncMode,

    /// Pre-populate the local chain with this many generated blocks.
    #[arg(long, default_value_t = 0)]
    seed_blocks: u64,

    #[arg(long, default_value_t = false)]
    serve_snapshots: bool,

    #[arg(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    #[arg(long, default_value_t = 9090)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let chain_config = ChainConfig::devnet().with_network_id(args.network_id);
    let chain = Arc::new(MemoryChain::with_blocks(&chain_config, args.seed_blocks));
    info!(
        network_id = chain_config.network_id,
        head = %chain.current_head(),
        "Chain loaded"
    );

    let metrics = Arc::new(Metrics::try_new().context("failed to register metrics")?);
    let metrics_config = MetricsServerConfig {
        metrics_address: args.metrics_address,
        metrics_port: args.metrics_port,
    };
    let metrics_handle = task::spawn(metrics::server::run_metrics_server(
        metrics_config,
        metrics.clone(),
    ));

    let sync = Arc::new(SyncService::new(
        chain,
        Arc::new(BasicValidator),
        SyncConfig::default(),
        args.sync_mode,
        metrics,
    ));

    let handler_config = HandlerConfig::new(format!("chainsync/v{}", env!("CARGO_PKG_VERSION")))
        .with_serve_snapshots(args.serve_snapshots);
    let handler = Arc::new(Handler::new(sync.clone(), chain_config, handler_config));

    let network_service_config = Arc::new(NetworkServiceConfig::new(
        args.address,
        args.port,
        args.peers,
    ));
    let network_service = NetworkService::new(network_service_config, handler)
        .await
        .context("failed to create network service")?;

    let shutdown = CancellationToken::new();
    let sync_handle = task::spawn(sync.run(shutdown.clone()));
    let network_shutdown = shutdown.clone();
    let network_handle =
        task::spawn(async move { network_service.start(network_shutdown).await });

    tokio::select! {
        result = network_handle => {
            match result {
                Ok(Ok(())) => info!("Network service finished"),
                Ok(Err(err)) => warn!(?err, "Network service exited with error"),
                Err(err) => warn!(?err, "Network task failed"),
            }
        }
        result = metrics_handle => {
            if let Ok(Err(err)) = result {
                warn!(?err, "Metrics server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    shutdown.cancel();
    if let Err(err) = sync_handle.await {
        warn!(?err, "Sync task failed");
    }

    info!("Main async task exiting");
    Ok(())
}
