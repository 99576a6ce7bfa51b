use libp2p::PeerId;
use thiserror::Error;

use crate::network::types::module::Module;

/// Errors produced by the switch and its collaborators
#[derive(Debug, Error)]
pub enum P2pError {
    /// Private key is not valid base64
    #[error("Key decode error: {0}")]
    KeyDecode(#[from] base64::DecodeError),

    /// Private key bytes are not a valid protobuf key encoding
    #[error("Identity error: {0}")]
    Identity(#[from] libp2p::identity::DecodingError),

    /// The network host could not be constructed or started
    #[error("Host error: {0}")]
    Host(String),

    /// The distributed hash table failed
    #[error("DHT error: {0}")]
    Dht(String),

    /// A multiaddress could not be parsed or lacks a peer identity
    #[error("Invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Low-level connection to a peer failed
    #[error("Dial to {peer} failed: {reason}")]
    Dial { peer: PeerId, reason: String },

    /// The application stream could not be opened
    #[error("Stream to {peer} failed: {reason}")]
    Stream { peer: PeerId, reason: String },

    /// An identity string could not be decoded
    #[error("Invalid peer id {0}")]
    InvalidPeerId(String),

    /// Peer is not present in the peer set
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Delivery to a peer failed or timed out
    #[error("Send to {peer} on channel {channel} failed")]
    SendFailed { peer: PeerId, channel: i32 },

    /// A reactor is already registered for the module
    #[error("Module has been registered before: {0}")]
    DuplicateReactor(Module),

    /// A mandatory reactor is missing
    #[error("Module {0} must be registered")]
    MissingReactor(Module),

    /// The switch was already started
    #[error("Switch already started")]
    AlreadyStarted,

    /// The switch has not been started
    #[error("Switch not started")]
    NotStarted,

    /// The peer connection is no longer usable
    #[error("Peer {0} stopped")]
    PeerStopped(PeerId),

    /// The routing table is still empty after bootstrapping
    #[error("No peers in routing table")]
    NoRoutingPeers,

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// A message failed validation
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Write-ahead log misuse or corruption
    #[error("WAL error: {0}")]
    Wal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAL record encoding error
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, P2pError>;
