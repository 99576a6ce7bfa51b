use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, noise, relay, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm, SwarmBuilder};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};

use crate::error::{self, P2pError};
use crate::network::host::{Incoming, Network};

/// Application protocol every peer stream is negotiated under
pub const STREAM_PROTOCOL: StreamProtocol = StreamProtocol::new("/hotstuff/p2p");

/// Kademlia protocol name
pub const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/hotstuff/p2p/kad/1.0.0");

const IDENTIFY_PROTOCOL: &str = "/hotstuff/id/1.0.0";

/// How long `launch` waits for the first listen address
const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Application stream over a libp2p substream
pub type HostStream = Compat<libp2p::Stream>;

#[derive(NetworkBehaviour)]
struct SwitchBehaviour {
    kad: kad::Behaviour<MemoryStore>,
    relay: relay::Behaviour,
    identify: identify::Behaviour,
    streams: libp2p_stream::Behaviour,
}

impl SwitchBehaviour {
    fn new(key: &Keypair) -> Self {
        let peer_id = key.public().to_peer_id();

        let mut kad_config = kad::Config::new(KAD_PROTOCOL);
        kad_config.set_query_timeout(Duration::from_secs(30));
        let mut kad = kad::Behaviour::with_config(peer_id, MemoryStore::new(peer_id), kad_config);
        kad.set_mode(Some(kad::Mode::Server));

        Self {
            kad,
            relay: relay::Behaviour::new(peer_id, Default::default()),
            identify: identify::Behaviour::new(identify::Config::new(
                IDENTIFY_PROTOCOL.to_string(),
                key.public(),
            )),
            streams: libp2p_stream::Behaviour::new(),
        }
    }
}

/// Requests from the host handle to the swarm driver
enum Command {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<error::Result<()>>,
    },
    PeerAddrs {
        peer: PeerId,
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    Bootstrap {
        reply: oneshot::Sender<error::Result<()>>,
    },
    RoutingPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    RemoveRoutingPeer {
        peer: PeerId,
    },
    Shutdown,
}

/// libp2p host over TCP (with DNS resolution), Noise and Yamux.
/// Runs relay, identify and Kademlia alongside the application streams.
pub struct Libp2pHost {
    peer_id: PeerId,
    listen_addr: Multiaddr,
    commands: mpsc::Sender<Command>,
    control: libp2p_stream::Control,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Libp2pHost {
    /// Build the swarm, listen on `listen` and spawn the driver task
    ///
    /// Returns the host and the stream of inbound application streams.
    pub async fn launch(keypair: Keypair, listen: &str) -> error::Result<(Self, Incoming<HostStream>)> {
        let listen: Multiaddr = listen.parse().map_err(|e: libp2p::multiaddr::Error| {
            P2pError::InvalidAddress {
                addr: listen.to_string(),
                reason: e.to_string(),
            }
        })?;
        let peer_id = keypair.public().to_peer_id();

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
            .map_err(|e| P2pError::Host(e.to_string()))?
            .with_dns()
            .map_err(|e| P2pError::Host(e.to_string()))?
            .with_behaviour(SwitchBehaviour::new)
            .map_err(|e| P2pError::Host(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
            .build();

        let control = swarm.behaviour().streams.new_control();
        let incoming = control
            .clone()
            .accept(STREAM_PROTOCOL)
            .map_err(|e| P2pError::Host(e.to_string()))?;

        swarm
            .listen_on(listen.clone())
            .map_err(|e| P2pError::Host(format!("listen on {}: {}", listen, e)))?;

        let bound = timeout(LISTEN_TIMEOUT, first_listen_addr(&mut swarm))
            .await
            .map_err(|_| P2pError::Host(format!("no listen address on {} after {:?}", listen, LISTEN_TIMEOUT)))??;
        let listen_addr = bound.with(Protocol::P2p(peer_id));
        info!("Host {} listening on {}", peer_id, listen_addr);

        let (commands, rx) = mpsc::channel(64);
        let driver = tokio::spawn(Driver::new(swarm, rx).run());

        let incoming = incoming
            .map(|(peer, stream)| (peer, stream.compat()))
            .boxed();

        Ok((
            Self {
                peer_id,
                listen_addr,
                commands,
                control,
                driver: Mutex::new(Some(driver)),
            },
            incoming,
        ))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(make(reply)).await.is_err() {
            debug!("Host driver is gone");
            return None;
        }
        rx.await.ok()
    }
}

async fn first_listen_addr(swarm: &mut Swarm<SwitchBehaviour>) -> error::Result<Multiaddr> {
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr { address, .. } => return Ok(address),
            SwarmEvent::ListenerError { error, .. } => {
                return Err(P2pError::Host(error.to_string()));
            }
            SwarmEvent::ListenerClosed { reason: Err(e), .. } => {
                return Err(P2pError::Host(e.to_string()));
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Network for Libp2pHost {
    type Stream = HostStream;

    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn listen_addr(&self) -> Multiaddr {
        self.listen_addr.clone()
    }

    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> error::Result<()> {
        self.request(|reply| Command::Dial { peer, addrs, reply })
            .await
            .unwrap_or_else(|| Err(P2pError::Dial { peer, reason: "host closed".to_string() }))
    }

    async fn open_stream(&self, peer: PeerId) -> error::Result<Self::Stream> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, STREAM_PROTOCOL)
            .await
            .map_err(|e| P2pError::Stream { peer, reason: e.to_string() })?;
        Ok(stream.compat())
    }

    async fn peer_addrs(&self, peer: PeerId) -> Vec<Multiaddr> {
        self.request(|reply| Command::PeerAddrs { peer, reply })
            .await
            .unwrap_or_default()
    }

    async fn bootstrap_routing(&self) -> error::Result<()> {
        self.request(|reply| Command::Bootstrap { reply })
            .await
            .unwrap_or_else(|| Err(P2pError::Dht("host closed".to_string())))
    }

    async fn routing_peers(&self) -> Vec<PeerId> {
        self.request(|reply| Command::RoutingPeers { reply })
            .await
            .unwrap_or_default()
    }

    async fn remove_routing_peer(&self, peer: PeerId) {
        let _ = self.commands.send(Command::RemoveRoutingPeer { peer }).await;
    }

    async fn close(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let driver = self.driver.lock().ok().and_then(|mut d| d.take());
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!("Host driver ended abnormally: {}", e);
            }
            info!("Host {} closed", self.peer_id);
        }
    }
}

/// Owns the swarm and serves commands between swarm events
struct Driver {
    swarm: Swarm<SwitchBehaviour>,
    commands: mpsc::Receiver<Command>,

    /// Dial replies waiting for a connection outcome
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<error::Result<()>>>>,

    /// Addresses learned from dials, identify and the DHT
    peer_book: HashMap<PeerId, Vec<Multiaddr>>,
}

impl Driver {
    fn new(swarm: Swarm<SwitchBehaviour>, commands: mpsc::Receiver<Command>) -> Self {
        Self {
            swarm,
            commands,
            pending_dials: HashMap::new(),
            peer_book: HashMap::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        for (peer, replies) in self.pending_dials.drain() {
            for reply in replies {
                let _ = reply.send(Err(P2pError::Dial { peer, reason: "host closed".to_string() }));
            }
        }
        debug!("Host driver stopped");
    }

    fn remember(&mut self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let known = self.peer_book.entry(peer).or_default();
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, addrs, reply } => {
                if self.swarm.is_connected(&peer) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.remember(peer, addrs.iter().cloned());

                // A dial is already in flight, wait for its outcome
                if let Some(waiting) = self.pending_dials.get_mut(&peer) {
                    waiting.push(reply);
                    return;
                }

                let opts = DialOpts::peer_id(peer).addresses(addrs).build();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(peer, vec![reply]);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(P2pError::Dial { peer, reason: e.to_string() }));
                    }
                }
            }
            Command::PeerAddrs { peer, reply } => {
                let addrs = self.peer_book.get(&peer).cloned().unwrap_or_default();
                let _ = reply.send(addrs);
            }
            Command::Bootstrap { reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .bootstrap()
                    .map(|_| ())
                    .map_err(|e| P2pError::Dht(e.to_string()));
                let _ = reply.send(result);
            }
            Command::RoutingPeers { reply } => {
                let peers = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .kbuckets()
                    .flat_map(|bucket| {
                        bucket
                            .iter()
                            .map(|entry| *entry.node.key.preimage())
                            .collect::<Vec<_>>()
                    })
                    .collect();
                let _ = reply.send(peers);
            }
            Command::RemoveRoutingPeer { peer } => {
                if self.swarm.behaviour_mut().kad.remove_peer(&peer).is_some() {
                    debug!("Removed {} from routing table", peer);
                }
                self.peer_book.remove(&peer);
            }
            Command::Shutdown => {}
        }
    }

    fn resolve_dial(&mut self, peer: PeerId, result: impl Fn() -> error::Result<()>) {
        if let Some(replies) = self.pending_dials.remove(&peer) {
            for reply in replies {
                let _ = reply.send(result());
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<SwitchBehaviourEvent>) {
        match event {
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!("Connection established with {} ({:?})", peer_id, endpoint);
                if endpoint.is_dialer() {
                    let addr = endpoint.get_remote_address().clone();
                    self.swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                    self.remember(peer_id, [addr]);
                }
                self.resolve_dial(peer_id, || Ok(()));
            }
            SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                debug!("Dial to {} failed: {}", peer_id, error);
                let reason = error.to_string();
                self.resolve_dial(peer_id, || Err(P2pError::Dial { peer: peer_id, reason: reason.clone() }));
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established: 0, .. } => {
                debug!("All connections to {} closed", peer_id);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }
            SwarmEvent::Behaviour(SwitchBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                for addr in &info.listen_addrs {
                    self.swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                }
                self.remember(peer_id, info.listen_addrs);
            }
            SwarmEvent::Behaviour(SwitchBehaviourEvent::Kad(kad::Event::RoutingUpdated { peer, addresses, .. })) => {
                debug!("Routing table updated with {}", peer);
                self.remember(peer, addresses.iter().cloned());
            }
            SwarmEvent::Behaviour(SwitchBehaviourEvent::Kad(kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(result),
                ..
            })) => match result {
                Ok(ok) => debug!("Bootstrap progressed via {}, {} remaining", ok.peer, ok.num_remaining),
                Err(e) => debug!("Bootstrap query failed: {:?}", e),
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_reports_dialable_address() {
        let keypair = Keypair::generate_ed25519();
        let expected = keypair.public().to_peer_id();

        let (host, _incoming) = Libp2pHost::launch(keypair, "/ip4/127.0.0.1/tcp/0").await.unwrap();
        assert_eq!(host.local_peer_id(), expected);

        let (peer, transport) = crate::network::host::split_p2p_addr(&host.listen_addr().to_string()).unwrap();
        assert_eq!(peer, expected);
        assert!(transport.to_string().starts_with("/ip4/127.0.0.1/tcp/"));

        // Empty routing table
        assert!(host.routing_peers().await.is_empty());
        assert!(matches!(host.bootstrap_routing().await, Err(P2pError::Dht(_))));

        host.close().await;
    }

    #[tokio::test]
    async fn test_remove_routing_peer_forgets_addresses() {
        let (host, _incoming) = Libp2pHost::launch(Keypair::generate_ed25519(), "/ip4/127.0.0.1/tcp/0").await.unwrap();

        let remote = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
        let _ = timeout(Duration::from_secs(5), host.connect(remote, vec![addr.clone()])).await;
        assert_eq!(host.peer_addrs(remote).await, vec![addr]);

        host.remove_routing_peer(remote).await;
        assert!(host.peer_addrs(remote).await.is_empty());

        host.close().await;
    }

    #[tokio::test]
    async fn test_launch_rejects_bad_listen_address() {
        let result = Libp2pHost::launch(Keypair::generate_ed25519(), "garbage").await;
        assert!(matches!(result, Err(P2pError::InvalidAddress { .. })));
    }
}
