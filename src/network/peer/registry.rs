use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use libp2p::PeerId;
use log::debug;

use crate::network::peer::handler::Peer;

/// Outcome of offering a peer to the set
pub enum Admission {
    /// No entry existed for the identity
    Added,

    /// A stopped peer was replaced; the old one is returned for cleanup
    Replaced(Arc<Peer>),

    /// A valid peer already holds the identity; the offered one is returned
    Rejected(Arc<Peer>),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// Live peers keyed by identity, at most one per identity
#[derive(Default)]
pub struct PeerSet {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless a valid peer already holds the identity
    ///
    /// Check and insert happen under the entry lock, so two concurrent
    /// admissions for one identity never both succeed.
    pub fn add(&self, peer: Arc<Peer>) -> Admission {
        match self.peers.entry(peer.id()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_valid() {
                    debug!("Peer {} already connected, rejecting duplicate", peer.id());
                    Admission::Rejected(peer)
                } else {
                    Admission::Replaced(entry.insert(peer))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(peer);
                Admission::Added
            }
        }
    }

    pub fn find(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    /// Whether a usable peer exists for `id`
    pub fn contains_valid(&self, id: &PeerId) -> bool {
        self.peers.get(id).map(|entry| entry.is_valid()).unwrap_or(false)
    }

    pub fn remove(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    /// Remove `id` only if it still maps to this exact peer
    pub fn remove_peer(&self, peer: &Arc<Peer>) -> bool {
        self.peers
            .remove_if(&peer.id(), |_, current| Arc::ptr_eq(current, peer))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Point-in-time copy for iteration without holding locks
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Drop entries whose stream is no longer usable
    pub fn prune_stopped(&self) -> Vec<Arc<Peer>> {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| !entry.is_valid())
            .map(|entry| *entry.key())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.peers.remove_if(&id, |_, peer| !peer.is_valid()))
            .map(|(_, peer)| peer)
            .collect()
    }

    /// Remove and return every peer
    pub fn clear(&self) -> Vec<Arc<Peer>> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.peers.remove(&id))
            .map(|(_, peer)| peer)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;
    use crate::network::handlers::table::ReactorTable;
    use crate::network::peer::handler::PeerConfig;
    use crate::network::types::direction::Direction;
    use crate::network::types::module::Module;

    fn reactors() -> Arc<ReactorTable> {
        let mut table = ReactorTable::new();
        let (tx, _rx) = mpsc::channel::<(PeerId, i32, Bytes)>(16);
        table.register(Module::Consensus, Arc::new(tx)).unwrap();
        Arc::new(table)
    }

    fn peer_for(id: PeerId) -> (Arc<Peer>, DuplexStream) {
        let (local, remote) = duplex(1024);
        let peer = Peer::new(id, vec![], Direction::Inbound, local, reactors(), PeerConfig::default()).unwrap();
        (Arc::new(peer), remote)
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_valid_peer() {
        let set = PeerSet::new();
        let id = PeerId::random();

        let (first, _r1) = peer_for(id);
        let (second, _r2) = peer_for(id);

        assert!(matches!(set.add(first.clone()), Admission::Added));
        match set.add(second.clone()) {
            Admission::Rejected(peer) => assert!(Arc::ptr_eq(&peer, &second)),
            _ => panic!("duplicate should be rejected"),
        }

        assert_eq!(set.len(), 1);
        assert!(Arc::ptr_eq(&set.find(&id).unwrap(), &first));
    }

    #[tokio::test]
    async fn test_add_replaces_stopped_peer() {
        let set = PeerSet::new();
        let id = PeerId::random();

        let (stale, _r1) = peer_for(id);
        set.add(stale.clone());
        stale.flush_stop().await;
        assert!(!set.contains_valid(&id));

        let (fresh, _r2) = peer_for(id);
        match set.add(fresh.clone()) {
            Admission::Replaced(old) => assert!(Arc::ptr_eq(&old, &stale)),
            _ => panic!("stopped peer should be replaced"),
        }
        assert!(set.contains_valid(&id));
    }

    #[tokio::test]
    async fn test_prune_and_clear() {
        let set = PeerSet::new();
        let (alive, _r1) = peer_for(PeerId::random());
        let (dead, _r2) = peer_for(PeerId::random());
        set.add(alive.clone());
        set.add(dead.clone());

        dead.flush_stop().await;
        let pruned = set.prune_stopped();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id(), dead.id());
        assert_eq!(set.ids(), vec![alive.id()]);

        assert_eq!(set.clear().len(), 1);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_remove_peer_only_matches_same_instance() {
        let set = PeerSet::new();
        let id = PeerId::random();
        let (current, _r1) = peer_for(id);
        let (other, _r2) = peer_for(id);

        set.add(current.clone());
        assert!(!set.remove_peer(&other));
        assert!(set.remove_peer(&current));
        assert!(set.find(&id).is_none());
    }
}
