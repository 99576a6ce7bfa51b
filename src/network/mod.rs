// HotStuff Network Module
//
// This module provides the peer-to-peer transport underneath consensus:
// - Peer discovery over a Kademlia DHT and connection management
// - Per-peer framed streams demultiplexed by channel id
// - Reactor dispatch into the consensus, mempool and state-sync modules
// - Point-to-point send and best-effort broadcast

pub mod types;
pub mod codec;
pub mod handlers;
pub mod peer;
pub mod host;
pub mod service;

pub use codec::frame::{Frame, FrameCodec};
pub use handlers::reactor::{Reactor, ReactorError};
pub use handlers::table::ReactorTable;
pub use host::{Incoming, Network};
pub use host::swarm::Libp2pHost;
pub use peer::handler::Peer;
pub use peer::registry::{Admission, PeerSet};
pub use service::Switch;
pub use types::module::Module;

pub use libp2p::{Multiaddr, PeerId};
