// In-memory network used to drive the switch without sockets

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

use hotstuff_p2p::config::SwitchConfig;
use hotstuff_p2p::network::{Incoming, Module, Network, Reactor};
use hotstuff_p2p::{P2pError, Result, Switch};

const STREAM_BUFFER: usize = 64 * 1024;

pub type Inbox = mpsc::Receiver<(PeerId, i32, Bytes)>;
pub type MemorySwitch = Switch<MemoryNetwork>;

/// Shared registry of in-memory nodes
#[derive(Default)]
pub struct Hub {
    nodes: Mutex<HashMap<PeerId, UnboundedSender<(PeerId, DuplexStream)>>>,
    next_port: Mutex<u16>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node and return its network and inbound stream source
    pub fn join(self: &Arc<Self>) -> (MemoryNetwork, Incoming<DuplexStream>) {
        let id = PeerId::random();
        let port = {
            let mut next = self.next_port.lock().unwrap();
            *next += 1;
            *next
        };
        let addr: Multiaddr = format!("/memory/{}", port).parse().unwrap();

        let (tx, rx) = unbounded();
        self.nodes.lock().unwrap().insert(id, tx);

        let network = MemoryNetwork {
            id,
            addr,
            hub: self.clone(),
            addrs: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashSet::new()),
            routing: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
        };
        (network, rx.boxed())
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.nodes.lock().unwrap().contains_key(id)
    }

    /// Deliver a stream to `target` that claims to come from `from`
    pub fn inject(&self, target: PeerId, from: PeerId) -> Option<DuplexStream> {
        let (local, remote) = duplex(STREAM_BUFFER);
        let nodes = self.nodes.lock().unwrap();
        nodes.get(&target)?.unbounded_send((from, remote)).ok()?;
        Some(local)
    }

    fn leave(&self, id: &PeerId) {
        self.nodes.lock().unwrap().remove(id);
    }
}

/// `Network` over the hub, with a hand-fed routing table
pub struct MemoryNetwork {
    id: PeerId,
    addr: Multiaddr,
    hub: Arc<Hub>,
    addrs: Mutex<HashMap<PeerId, Vec<Multiaddr>>>,
    connected: Mutex<HashSet<PeerId>>,
    routing: Mutex<Vec<PeerId>>,
    stalled: AtomicBool,
}

impl MemoryNetwork {
    /// Make every later `connect` hang forever, like a blackholed address
    pub fn stall_dials(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Make the DHT aware of `peer` at `addr`
    pub fn learn(&self, peer: PeerId, addr: Multiaddr) {
        self.addrs.lock().unwrap().entry(peer).or_default().push(addr);
        let mut routing = self.routing.lock().unwrap();
        if !routing.contains(&peer) {
            routing.push(peer);
        }
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    type Stream = DuplexStream;

    fn local_peer_id(&self) -> PeerId {
        self.id
    }

    fn listen_addr(&self) -> Multiaddr {
        self.addr.clone().with(Protocol::P2p(self.id))
    }

    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if !self.hub.contains(&peer) {
            return Err(P2pError::Dial { peer, reason: "unreachable".to_string() });
        }
        self.connected.lock().unwrap().insert(peer);
        for addr in addrs {
            self.learn(peer, addr);
        }
        Ok(())
    }

    async fn open_stream(&self, peer: PeerId) -> Result<DuplexStream> {
        if !self.connected.lock().unwrap().contains(&peer) {
            return Err(P2pError::Stream { peer, reason: "not connected".to_string() });
        }
        self.hub
            .inject(peer, self.id)
            .ok_or_else(|| P2pError::Stream { peer, reason: "peer left".to_string() })
    }

    async fn peer_addrs(&self, peer: PeerId) -> Vec<Multiaddr> {
        self.addrs.lock().unwrap().get(&peer).cloned().unwrap_or_default()
    }

    async fn bootstrap_routing(&self) -> Result<()> {
        if self.routing.lock().unwrap().is_empty() {
            return Err(P2pError::Dht("no known peers".to_string()));
        }
        Ok(())
    }

    async fn routing_peers(&self) -> Vec<PeerId> {
        self.routing.lock().unwrap().clone()
    }

    async fn remove_routing_peer(&self, peer: PeerId) {
        self.routing.lock().unwrap().retain(|p| *p != peer);
    }

    async fn close(&self) {
        self.hub.leave(&self.id);
    }
}

/// Fast timings for tests
pub fn test_config(bootstrap: Vec<String>) -> SwitchConfig {
    SwitchConfig {
        address: "/memory/0".to_string(),
        bootstrap,
        discovery_interval_secs: 1,
        send_timeout_ms: 1_000,
        drain_timeout_ms: 500,
        bootstrap_timeout_secs: 1,
        ..SwitchConfig::default()
    }
}

/// Switch with a channel reactor on every module
pub fn switch_with_reactors(config: SwitchConfig) -> (MemorySwitch, HashMap<Module, Inbox>) {
    let mut switch = Switch::new(config);
    let mut inboxes = HashMap::new();
    for module in Module::ALL {
        let (tx, rx) = mpsc::channel(64);
        let reactor: Arc<dyn Reactor> = Arc::new(tx);
        switch.add_reactor(module, reactor).unwrap();
        inboxes.insert(module, rx);
    }
    (switch, inboxes)
}

/// Join the hub and start the switch on it
pub async fn start_on(hub: &Arc<Hub>, switch: &MemorySwitch) -> PeerId {
    let (network, incoming) = hub.join();
    let id = network.local_peer_id();
    switch.start_with(network, incoming).await.unwrap();
    id
}

/// Dialable address of a started switch
pub fn addr_of(switch: &MemorySwitch) -> String {
    switch.network().unwrap().listen_addr().to_string()
}

/// Poll `check` until it holds or the deadline passes
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
