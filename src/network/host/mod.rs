// Network host boundary
//
// The switch talks to the host and its DHT only through `Network`, so the
// same orchestration runs over libp2p in production and over in-memory
// streams in tests.

pub mod swarm;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::stream::BoxStream;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{P2pError, Result};

/// Inbound application streams with the identity of the remote
pub type Incoming<S> = BoxStream<'static, (PeerId, S)>;

/// Host plus DHT operations the switch depends on
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Application stream type
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn local_peer_id(&self) -> PeerId;

    /// Full dialable address, including `/p2p/<peer-id>`
    fn listen_addr(&self) -> Multiaddr;

    /// Open a low-level connection. Succeeds immediately if already connected.
    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()>;

    /// Open the application protocol stream to a connected peer
    async fn open_stream(&self, peer: PeerId) -> Result<Self::Stream>;

    /// Addresses known for `peer`
    async fn peer_addrs(&self, peer: PeerId) -> Vec<Multiaddr>;

    /// Start a DHT bootstrap round
    async fn bootstrap_routing(&self) -> Result<()>;

    /// Identities currently in the DHT routing table
    async fn routing_peers(&self) -> Vec<PeerId>;

    async fn remove_routing_peer(&self, peer: PeerId);

    /// Shut the host down
    async fn close(&self);
}

/// Split `<transport>/p2p/<peer-id>` into identity and transport address
pub fn split_p2p_addr(addr: &str) -> Result<(PeerId, Multiaddr)> {
    let mut multiaddr: Multiaddr = addr.parse().map_err(|e: libp2p::multiaddr::Error| {
        P2pError::InvalidAddress {
            addr: addr.to_string(),
            reason: e.to_string(),
        }
    })?;

    match multiaddr.pop() {
        Some(Protocol::P2p(peer)) => Ok((peer, multiaddr)),
        _ => Err(P2pError::InvalidAddress {
            addr: addr.to_string(),
            reason: "missing /p2p/<peer-id> suffix".to_string(),
        }),
    }
}

/// Append `/p2p/<peer>` to a transport address unless already present
pub fn peer_multiaddr(addr: &Multiaddr, peer: PeerId) -> Multiaddr {
    match addr.iter().last() {
        Some(Protocol::P2p(_)) => addr.clone(),
        _ => addr.clone().with(Protocol::P2p(peer)),
    }
}

/// Parse an identity string
pub fn parse_peer_id(id: &str) -> Result<PeerId> {
    id.parse::<PeerId>()
        .map_err(|_| P2pError::InvalidPeerId(id.to_string()))
}

/// Decode a base64 protobuf-encoded private key
pub fn decode_keypair(private_key: &str) -> Result<Keypair> {
    let bytes = general_purpose::STANDARD.decode(private_key.trim())?;
    Ok(Keypair::from_protobuf_encoding(&bytes)?)
}

/// Encode a key pair as base64 `(private, public)` protobuf strings
pub fn encode_keypair(keypair: &Keypair) -> Result<(String, String)> {
    let private = keypair.to_protobuf_encoding()?;
    let public = keypair.public().encode_protobuf();
    Ok((
        general_purpose::STANDARD.encode(private),
        general_purpose::STANDARD.encode(public),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_p2p_addr() {
        let peer = PeerId::random();
        let addr = format!("/ip4/10.0.0.1/tcp/30100/p2p/{}", peer);

        let (id, transport) = split_p2p_addr(&addr).unwrap();
        assert_eq!(id, peer);
        assert_eq!(transport.to_string(), "/ip4/10.0.0.1/tcp/30100");
        assert_eq!(peer_multiaddr(&transport, id).to_string(), addr);
    }

    #[test]
    fn test_split_rejects_malformed() {
        assert!(matches!(
            split_p2p_addr("/ip4/10.0.0.1/tcp/30100"),
            Err(P2pError::InvalidAddress { .. })
        ));
        assert!(matches!(
            split_p2p_addr("not a multiaddr"),
            Err(P2pError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_peer_multiaddr_keeps_existing_suffix() {
        let peer = PeerId::random();
        let full: Multiaddr = format!("/ip4/127.0.0.1/tcp/1/p2p/{}", peer).parse().unwrap();
        assert_eq!(peer_multiaddr(&full, PeerId::random()), full);
    }

    #[test]
    fn test_parse_peer_id() {
        let peer = PeerId::random();
        assert_eq!(parse_peer_id(&peer.to_string()).unwrap(), peer);
        assert!(matches!(parse_peer_id("bogus"), Err(P2pError::InvalidPeerId(_))));
    }

    #[test]
    fn test_keypair_encoding() {
        let keypair = Keypair::generate_ed25519();
        let (private, public) = encode_keypair(&keypair).unwrap();
        assert!(!public.is_empty());

        let decoded = decode_keypair(&private).unwrap();
        assert_eq!(decoded.public().to_peer_id(), keypair.public().to_peer_id());
    }

    #[test]
    fn test_decode_keypair_errors() {
        assert!(matches!(decode_keypair("!!not base64!!"), Err(P2pError::KeyDecode(_))));

        let garbage = general_purpose::STANDARD.encode(b"not a key");
        assert!(matches!(decode_keypair(&garbage), Err(P2pError::Identity(_))));
    }
}
