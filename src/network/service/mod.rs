// Network service module

pub mod dialer;
pub mod listener;
pub mod discovery;

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SwitchConfig;
use crate::error::{P2pError, Result};
use crate::network::handlers::reactor::Reactor;
use crate::network::handlers::table::ReactorTable;
use crate::network::host::swarm::Libp2pHost;
use crate::network::host::{decode_keypair, parse_peer_id, Incoming, Network};
use crate::network::peer::broadcaster::{flush_all, PeerBroadcaster};
use crate::network::peer::registry::PeerSet;
use crate::network::service::dialer::Connector;
use crate::network::service::discovery::{bootstrap, signalled, DiscoveryLoop};
use crate::network::service::listener::accept_loop;
use crate::network::types::module::Module;

/// Top-level orchestrator of the peer-to-peer layer
///
/// Reactors are registered with `add_reactor` before `start`; after that
/// the reactor table is shared read-only with every peer.
pub struct Switch<N: Network = Libp2pHost> {
    /// Immutable after construction
    config: SwitchConfig,

    reactors: Arc<ReactorTable>,
    peers: Arc<PeerSet>,
    broadcaster: PeerBroadcaster,

    /// Set once by `start`
    network: OnceLock<Arc<N>>,

    /// Shutdown signal for the accept and discovery loops
    shutdown: watch::Sender<bool>,

    /// Background loops spawned by `start`
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: Network> Switch<N> {
    pub fn new(config: SwitchConfig) -> Self {
        let peers = Arc::new(PeerSet::new());
        let broadcaster = PeerBroadcaster::new(peers.clone(), config.fan_out_limit());
        let (shutdown, _) = watch::channel(false);

        info!(
            "New switch, listen {} with {} bootstrap peers",
            config.address,
            config.bootstrap.len()
        );

        Self {
            config,
            reactors: Arc::new(ReactorTable::new()),
            peers,
            broadcaster,
            network: OnceLock::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn reactors(&self) -> &ReactorTable {
        &self.reactors
    }

    /// The running network, once started
    pub fn network(&self) -> Option<&Arc<N>> {
        self.network.get()
    }

    pub fn is_started(&self) -> bool {
        self.network.get().is_some()
    }

    /// Register the reactor for `module`. Must be called before `start`;
    /// the consensus module must be registered.
    pub fn add_reactor(&mut self, module: Module, reactor: Arc<dyn Reactor>) -> Result<()> {
        if self.is_started() {
            return Err(P2pError::AlreadyStarted);
        }
        Arc::get_mut(&mut self.reactors)
            .ok_or(P2pError::AlreadyStarted)?
            .register(module, reactor)
    }

    /// Start over an already running network
    ///
    /// Spawns the accept loop, bootstraps, then spawns the discovery loop.
    pub async fn start_with(&self, network: N, incoming: Incoming<N::Stream>) -> Result<()> {
        let network = Arc::new(network);
        if self.network.set(network.clone()).is_err() {
            network.close().await;
            return Err(P2pError::AlreadyStarted);
        }

        if !self.reactors.has_reactor(Module::Consensus) {
            warn!("No consensus reactor registered, every peer will be rejected");
        }

        let connector = Connector::new(
            network.clone(),
            self.peers.clone(),
            self.reactors.clone(),
            &self.config,
            self.shutdown.subscribe(),
        );

        info!("Switch {} started on {}", network.local_peer_id(), network.listen_addr());

        let accept = tokio::spawn(accept_loop(incoming, connector.clone(), self.shutdown.subscribe()));
        self.track(accept);

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = signalled(&mut shutdown) => {}
            _ = bootstrap(&connector, &self.config) => {}
        }

        if *shutdown.borrow() {
            info!("Switch stopped during bootstrap, discovery not started");
            return Ok(());
        }

        let discovery = DiscoveryLoop::new(connector, &self.config);
        self.track(tokio::spawn(discovery.run(self.shutdown.subscribe())));

        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Flush every peer, stop the background loops and close the network
    ///
    /// Before `start` this only flushes peers.
    pub async fn stop(&self) -> Result<()> {
        let network = match self.network.get() {
            Some(network) => network,
            None => {
                flush_all(self.peers.clear(), self.config.fan_out_limit()).await;
                return Ok(());
            }
        };

        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        let peers = self.peers.clear();
        let count = peers.len();
        flush_all(peers, self.config.fan_out_limit()).await;

        network.close().await;
        info!("Switch stopped, flushed {} peers", count);
        Ok(())
    }

    /// Best-effort send of `payload` on `channel` to every live peer
    ///
    /// Waits until every attempt finished or timed out and returns how many
    /// peers accepted the frame.
    pub async fn broadcast(&self, channel: i32, payload: impl Into<Bytes>) -> usize {
        let outcomes = self.broadcaster.broadcast(channel, payload.into()).await;
        let delivered = outcomes.iter().filter(|ok| **ok).count();
        if delivered < outcomes.len() {
            debug!("Broadcast on channel {} reached {}/{} peers", channel, delivered, outcomes.len());
        }
        delivered
    }

    /// Send `payload` on `channel` to the peer with identity string `id`
    pub async fn send(&self, id: &str, channel: i32, payload: impl Into<Bytes>) -> Result<()> {
        let peer = parse_peer_id(id)?;
        self.broadcaster.send_to_peer(&peer, channel, payload.into()).await
    }

    /// Identity format passthrough
    pub fn get_p2p_id(&self, id: &str) -> Result<String> {
        Ok(id.to_string())
    }
}

impl Switch<Libp2pHost> {
    /// Decode the key, bring up the libp2p host and start the switch
    pub async fn start(&self) -> Result<()> {
        if self.is_started() {
            return Err(P2pError::AlreadyStarted);
        }

        let keypair = decode_keypair(&self.config.private_key)?;
        let (host, incoming) = Libp2pHost::launch(keypair, &self.config.address).await?;
        self.start_with(host, incoming).await
    }

    /// Full dialable address of the running host
    pub fn listen_addr(&self) -> Option<String> {
        self.network().map(|host| host.listen_addr().to_string())
    }
}
