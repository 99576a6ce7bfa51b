use std::sync::Arc;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use libp2p::PeerId;
use log::{debug, info, warn};

use crate::error::{P2pError, Result};
use crate::network::peer::handler::Peer;
use crate::network::peer::registry::PeerSet;
use crate::util::fingerprint;

/// Send one payload to each peer with at most `limit` sends in flight
///
/// Returns one outcome per peer, in the order of `peers`.
pub async fn fan_out(peers: &[Arc<Peer>], channel: i32, payload: &Bytes, limit: usize) -> Vec<bool> {
    stream::iter(peers.iter().cloned())
        .map(|peer| {
            let payload = payload.clone();
            async move { peer.send(channel, payload).await }
        })
        .buffered(limit.max(1))
        .collect()
        .await
}

/// Flush every peer concurrently, at most `limit` at a time
pub async fn flush_all(peers: Vec<Arc<Peer>>, limit: usize) {
    stream::iter(peers)
        .for_each_concurrent(limit.max(1), |peer| async move {
            peer.flush_stop().await;
        })
        .await;
}

/// Broadcaster for sending frames to peers in a PeerSet
#[derive(Clone)]
pub struct PeerBroadcaster {
    /// Live peers
    peers: Arc<PeerSet>,

    /// Maximum concurrent sends per broadcast
    limit: usize,
}

impl PeerBroadcaster {
    pub fn new(peers: Arc<PeerSet>, limit: usize) -> Self {
        Self { peers, limit: limit.max(1) }
    }

    /// Best-effort send to every live peer
    ///
    /// Returns after every peer's attempt succeeded or timed out.
    pub async fn broadcast(&self, channel: i32, payload: Bytes) -> Vec<bool> {
        self.broadcast_filtered(channel, payload, None).await
    }

    /// Broadcast to every live peer except `except`
    pub async fn broadcast_except(&self, channel: i32, payload: Bytes, except: &PeerId) -> Vec<bool> {
        self.broadcast_filtered(channel, payload, Some(except)).await
    }

    async fn broadcast_filtered(&self, channel: i32, payload: Bytes, except: Option<&PeerId>) -> Vec<bool> {
        let targets: Vec<Arc<Peer>> = self
            .peers
            .snapshot()
            .into_iter()
            .filter(|peer| except != Some(&peer.id()))
            .collect();

        let digest = fingerprint(&payload);
        if targets.is_empty() {
            debug!("No peers to broadcast channel {} payload {} to", channel, digest);
            return Vec::new();
        }

        let outcomes = fan_out(&targets, channel, &payload, self.limit).await;

        let failed: Vec<Arc<Peer>> = targets
            .iter()
            .zip(&outcomes)
            .filter(|(_, ok)| !**ok)
            .map(|(peer, _)| peer.clone())
            .collect();

        info!(
            "Broadcast channel {} payload {} to {}/{} peers",
            channel,
            digest,
            targets.len() - failed.len(),
            targets.len()
        );

        if !failed.is_empty() {
            self.evict(failed).await;
        }

        outcomes
    }

    /// Send to a single peer, evicting it if the send fails
    pub async fn send_to_peer(&self, id: &PeerId, channel: i32, payload: Bytes) -> Result<()> {
        let peer = match self.peers.find(id) {
            Some(peer) => peer,
            None => {
                warn!("Peer {} not found", id);
                return Err(P2pError::PeerNotFound(id.to_string()));
            }
        };

        if peer.send(channel, payload).await {
            Ok(())
        } else {
            self.evict(vec![peer]).await;
            Err(P2pError::SendFailed { peer: *id, channel })
        }
    }

    async fn evict(&self, peers: Vec<Arc<Peer>>) {
        for peer in &peers {
            if self.peers.remove_peer(peer) {
                debug!("Removed failed peer {}", peer.id());
            }
        }
        flush_all(peers, self.limit).await;
    }
}
