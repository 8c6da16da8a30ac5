use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use chain::BlockChain;
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::{
    bootnodes::{PeerSource, StaticPeers},
    handler::Handler,
    types::{ConnectionState, Direction},
    wire::TcpConnection,
};

#[derive(Debug, Clone)]
pub struct NetworkServiceConfig {
    pub socket_address: IpAddr,
    pub socket_port: u16,
    pub reconnect_interval: Duration,
    peers: StaticPeers,
}

impl NetworkServiceConfig {
    /// `peers` entries are socket addresses or paths to YAML peer lists.
    pub fn new(socket_address: IpAddr, socket_port: u16, peers: Vec<String>) -> Self {
        let peers = StaticPeers::from_arguments(&peers);
        if peers.is_empty() {
            info!("No static peers configured, waiting for inbound connections");
        }

        NetworkServiceConfig {
            socket_address,
            socket_port,
            reconnect_interval: Duration::from_secs(30),
            peers,
        }
    }

    pub fn with_reconnect_interval(mut self, reconnect_interval: Duration) -> Self {
        self.reconnect_interval = reconnect_interval;
        self
    }

    pub fn peers(&self) -> &StaticPeers {
        &self.peers
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.socket_address, self.socket_port)
    }
}

/// Accepts inbound TCP connections, keeps dialing the configured peers and hands
/// every connection to the [`Handler`].
pub struct NetworkService<C: BlockChain> {
    network_config: Arc<NetworkServiceConfig>,
    handler: Arc<Handler<C>>,
    listener: TcpListener,
    peer_table: Arc<Mutex<HashMap<SocketAddr, ConnectionState>>>,
}

impl<C: BlockChain> NetworkService<C> {
    pub async fn new(network_config: Arc<NetworkServiceConfig>, handler: Arc<Handler<C>>) -> Result<Self> {
        let addr = network_config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        info!(address = %listener.local_addr()?, node = %handler.node_id(), "Listening for peers");

        Ok(Self {
            network_config,
            handler,
            listener,
            peer_table: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peer_table(&self) -> Arc<Mutex<HashMap<SocketAddr, ConnectionState>>> {
        self.peer_table.clone()
    }

    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        // Periodic reconnect attempts to static peers
        let mut reconnect_interval = interval(self.network_config.reconnect_interval);
        reconnect_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("Network service stopped");
                    return Ok(());
                }
                _ = reconnect_interval.tick() => {
                    self.connect_to_peers(self.network_config.peers.peer_addrs());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(%addr, "Incoming connection");
                        self.spawn_connection(stream, addr, Direction::Inbound);
                    }
                    Err(err) => warn!(?err, "Failed to accept connection"),
                },
            }
        }
    }

    fn connect_to_peers(&self, peers: Vec<SocketAddr>) {
        for addr in peers {
            let current_state = self.peer_table.lock().get(&addr).copied();
            if !matches!(current_state, Some(ConnectionState::Disconnected) | None) {
                trace!(%addr, "Already connected");
                continue;
            }

            info!(%addr, "Dialing peer");
            self.peer_table
                .lock()
                .insert(addr, ConnectionState::Connecting);

            let handler = self.handler.clone();
            let peer_table = self.peer_table.clone();
            tokio::spawn(async move {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        run_connection(handler, peer_table, stream, addr, Direction::Outbound).await
                    }
                    Err(err) => {
                        warn!(%addr, ?err, "Failed to connect to peer");
                        peer_table.lock().insert(addr, ConnectionState::Disconnected);
                    }
                }
            });
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, direction: Direction) {
        self.peer_table
            .lock()
            .insert(addr, ConnectionState::Connecting);
        tokio::spawn(run_connection(
            self.handler.clone(),
            self.peer_table.clone(),
            stream,
            addr,
            direction,
        ));
    }
}

async fn run_connection<C: BlockChain>(
    handler: Arc<Handler<C>>,
    peer_table: Arc<Mutex<HashMap<SocketAddr, ConnectionState>>>,
    stream: TcpStream,
    addr: SocketAddr,
    direction: Direction,
) {
    let connection = Box::new(TcpConnection::new(stream, addr));
    match handler.handle_connection(connection).await {
        Ok(peer) => {
            let connected = {
                let mut table = peer_table.lock();
                table.insert(addr, ConnectionState::Connected);
                connected_count(&table)
            };
            info!(peer = %peer.id, %addr, %direction, "Connected to peer (total: {})", connected);

            peer.closed().await;
        }
        Err(err) => {
            warn!(%addr, %direction, %err, "Handshake failed");
        }
    }

    let connected = {
        let mut table = peer_table.lock();
        table.insert(addr, ConnectionState::Disconnected);
        connected_count(&table)
    };
    info!(%addr, "Disconnected from peer (total: {})", connected);
}

fn connected_count(table: &HashMap<SocketAddr, ConnectionState>) -> usize {
    table
        .values()
        .filter(|state| **state == ConnectionState::Connected)
        .count()
}
