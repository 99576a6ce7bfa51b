use std::sync::Arc;
use log::{debug, info, warn};
use libp2p::PeerId;
use tokio::sync::watch;

use crate::config::SwitchConfig;
use crate::error::Result;
use crate::network::handlers::table::ReactorTable;
use crate::network::host::{split_p2p_addr, Network};
use crate::network::peer::handler::{Peer, PeerConfig};
use crate::network::peer::registry::{Admission, PeerSet};
use crate::network::types::direction::Direction;

/// Turns addresses and inbound streams into admitted peers
pub struct Connector<N: Network> {
    network: Arc<N>,
    peers: Arc<PeerSet>,
    reactors: Arc<ReactorTable>,
    peer_config: PeerConfig,
    shutdown: watch::Receiver<bool>,
}

impl<N: Network> Clone for Connector<N> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            peers: self.peers.clone(),
            reactors: self.reactors.clone(),
            peer_config: self.peer_config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<N: Network> Connector<N> {
    pub fn new(
        network: Arc<N>,
        peers: Arc<PeerSet>,
        reactors: Arc<ReactorTable>,
        config: &SwitchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            network,
            peers,
            reactors,
            peer_config: PeerConfig::from(config),
            shutdown,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Connect to `<transport>/p2p/<id>` and admit the peer
    ///
    /// Malformed addresses and failed dials are errors. Failing to set up
    /// the peer once connected is logged only.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        let (peer, transport) = split_p2p_addr(addr)?;
        if peer == self.network.local_peer_id() {
            debug!("Skipping dial to self at {}", addr);
            return Ok(());
        }

        self.network.connect(peer, vec![transport]).await?;

        if let Err(e) = self.dial_peer(peer).await {
            warn!("Connected to {} but could not set up peer: {}", peer, e);
        }
        Ok(())
    }

    /// Open the application stream to a connected identity and admit it
    pub async fn dial_peer(&self, id: PeerId) -> Result<()> {
        if self.peers.contains_valid(&id) {
            debug!("Peer {} already connected", id);
            return Ok(());
        }

        let stream = self.network.open_stream(id).await?;
        let addrs = self.network.peer_addrs(id).await;

        let peer = match Peer::new(id, addrs, Direction::Outbound, stream, self.reactors.clone(), self.peer_config.clone()) {
            Ok(peer) => peer,
            Err(e) => {
                self.network.remove_routing_peer(id).await;
                return Err(e);
            }
        };

        self.admit(Arc::new(peer)).await;
        Ok(())
    }

    /// Admit a stream opened by a remote peer
    pub async fn handle_stream(&self, id: PeerId, stream: N::Stream) {
        if self.peers.contains_valid(&id) {
            debug!("Peer {} already connected, discarding inbound stream", id);
            return;
        }

        let addrs = self.network.peer_addrs(id).await;
        match Peer::new(id, addrs, Direction::Inbound, stream, self.reactors.clone(), self.peer_config.clone()) {
            Ok(peer) => {
                self.admit(Arc::new(peer)).await;
            }
            Err(e) => warn!("Rejected inbound stream from {}: {}", id, e),
        }
    }

    /// Insert into the peer set and start, or discard if the identity is taken
    pub async fn admit(&self, peer: Arc<Peer>) -> bool {
        if self.shutting_down() {
            peer.flush_stop().await;
            return false;
        }

        match self.peers.add(peer.clone()) {
            Admission::Added => {}
            Admission::Replaced(old) => {
                debug!("Replacing stopped peer {}", old.id());
                old.flush_stop().await;
            }
            Admission::Rejected(duplicate) => {
                debug!("Discarding duplicate {} connection to {}", duplicate.direction(), duplicate.id());
                duplicate.flush_stop().await;
                return false;
            }
        }

        // Stop may have cleared the set between the check and the insert
        if self.shutting_down() {
            self.peers.remove_peer(&peer);
            peer.flush_stop().await;
            return false;
        }

        peer.start();
        info!("Admitted {} peer {} ({} connected)", peer.direction(), peer.id(), self.peers.len());
        true
    }
}
