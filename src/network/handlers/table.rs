use std::collections::HashMap;
use std::sync::Arc;
use libp2p::PeerId;
use log::{debug, info, warn};

use crate::error::{P2pError, Result};
use crate::network::codec::frame::Frame;
use crate::network::handlers::reactor::Reactor;
use crate::network::types::module::Module;
use crate::util::fingerprint;

/// Registry of reactors by module
///
/// Filled before the switch starts, then shared read-only by every peer.
#[derive(Default)]
pub struct ReactorTable {
    /// Reactors by module
    reactors: HashMap<Module, Arc<dyn Reactor>>,
}

impl ReactorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reactor, failing if the module already has one
    pub fn register(&mut self, module: Module, reactor: Arc<dyn Reactor>) -> Result<()> {
        if self.reactors.contains_key(&module) {
            return Err(P2pError::DuplicateReactor(module));
        }

        self.reactors.insert(module, reactor);
        info!("[module {}] registered", module);
        Ok(())
    }

    pub fn get(&self, module: Module) -> Option<Arc<dyn Reactor>> {
        self.reactors.get(&module).cloned()
    }

    pub fn has_reactor(&self, module: Module) -> bool {
        self.reactors.contains_key(&module)
    }

    pub fn count(&self) -> usize {
        self.reactors.len()
    }

    /// Fail unless `module` has a reactor
    pub fn require(&self, module: Module) -> Result<()> {
        if self.has_reactor(module) {
            Ok(())
        } else {
            Err(P2pError::MissingReactor(module))
        }
    }

    /// Deliver a frame to the reactor owning its channel
    ///
    /// Returns false when the frame was dropped. Reactor errors are logged
    /// and never propagate into the peer's read loop.
    pub async fn dispatch(&self, peer: PeerId, frame: Frame) -> bool {
        let Frame { channel, payload } = frame;

        let reactor = match Module::owner_of(channel).and_then(|m| self.get(m)) {
            Some(reactor) => reactor,
            None => {
                warn!(
                    "Dropping frame on unregistered channel {} from peer {} (payload {})",
                    channel, peer, fingerprint(&payload)
                );
                return false;
            }
        };

        let digest = fingerprint(&payload);
        match reactor.receive(peer, channel, payload).await {
            Ok(()) => {
                debug!("Delivered channel {} frame {} from peer {}", channel, digest, peer);
                true
            }
            Err(e) => {
                warn!(
                    "Reactor rejected channel {} frame {} from peer {}: {}",
                    channel, digest, peer, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use crate::network::handlers::reactor::ReactorError;
    use crate::network::types::module::channels;

    struct FailingReactor;

    #[async_trait::async_trait]
    impl Reactor for FailingReactor {
        async fn receive(&self, _peer: PeerId, _channel: i32, _payload: Bytes) -> std::result::Result<(), ReactorError> {
            Err(ReactorError::InvalidFormat("garbage".to_string()))
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut table = ReactorTable::new();
        let (first, _rx1) = mpsc::channel::<(PeerId, i32, Bytes)>(1);
        let (second, _rx2) = mpsc::channel::<(PeerId, i32, Bytes)>(1);

        let first: Arc<dyn Reactor> = Arc::new(first);
        table.register(Module::Consensus, first.clone()).unwrap();

        let err = table.register(Module::Consensus, Arc::new(second)).unwrap_err();
        assert!(matches!(err, P2pError::DuplicateReactor(Module::Consensus)));

        assert_eq!(table.count(), 1);
        assert!(Arc::ptr_eq(&table.get(Module::Consensus).unwrap(), &first));
    }

    #[tokio::test]
    async fn test_dispatch_by_channel() {
        let mut table = ReactorTable::new();
        let (consensus_tx, mut consensus_rx) = mpsc::channel(4);
        let (mempool_tx, mut mempool_rx) = mpsc::channel(4);
        table.register(Module::Consensus, Arc::new(consensus_tx)).unwrap();
        table.register(Module::Mempool, Arc::new(mempool_tx)).unwrap();

        let peer = PeerId::random();
        assert!(table.dispatch(peer, Frame::new(channels::CONSENSUS_VOTE, &b"vote"[..])).await);
        assert!(table.dispatch(peer, Frame::new(channels::MEMPOOL_TX, &b"tx"[..])).await);

        let (from, channel, payload) = consensus_rx.recv().await.unwrap();
        assert_eq!(from, peer);
        assert_eq!(channel, channels::CONSENSUS_VOTE);
        assert_eq!(&payload[..], b"vote");

        let (_, channel, payload) = mempool_rx.recv().await.unwrap();
        assert_eq!(channel, channels::MEMPOOL_TX);
        assert_eq!(&payload[..], b"tx");

        assert!(consensus_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_channel_dropped() {
        let mut table = ReactorTable::new();
        let (tx, mut rx) = mpsc::channel(4);
        table.register(Module::Consensus, Arc::new(tx)).unwrap();

        let peer = PeerId::random();
        assert!(!table.dispatch(peer, Frame::new(channels::STATE_SYNC_REQUEST, &b"req"[..])).await);
        assert!(!table.dispatch(peer, Frame::new(999, &b"junk"[..])).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reactor_error_is_contained() {
        let mut table = ReactorTable::new();
        table.register(Module::Consensus, Arc::new(FailingReactor)).unwrap();

        assert!(!table.dispatch(PeerId::random(), Frame::new(0, &b"x"[..])).await);
    }

    #[test]
    fn test_require() {
        let mut table = ReactorTable::new();
        assert!(matches!(table.require(Module::Consensus), Err(P2pError::MissingReactor(Module::Consensus))));

        let (tx, _rx) = mpsc::channel::<(PeerId, i32, Bytes)>(1);
        table.register(Module::Consensus, Arc::new(tx)).unwrap();
        assert!(table.require(Module::Consensus).is_ok());
    }
}
