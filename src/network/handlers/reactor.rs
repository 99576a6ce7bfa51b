//! Reactor contract implemented by the consensus layer.

use bytes::Bytes;
use libp2p::PeerId;

/// Reactor error type
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// Payload could not be decoded by the reactor
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Channel is owned by the module but not understood by the reactor
    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(i32),

    /// Reactor is shutting down or its queue is closed
    #[error("Reactor closed")]
    Closed,

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Message sink registered per module
///
/// The switch calls `receive` from the read loop of the peer the frame
/// arrived on, so frames from one peer are delivered in order. A slow
/// reactor delays only that peer.
#[async_trait::async_trait]
pub trait Reactor: Send + Sync {
    /// Handle an inbound payload on one of the module's channels
    async fn receive(&self, peer: PeerId, channel: i32, payload: Bytes) -> Result<(), ReactorError>;
}

#[async_trait::async_trait]
impl Reactor for tokio::sync::mpsc::Sender<(PeerId, i32, Bytes)> {
    async fn receive(&self, peer: PeerId, channel: i32, payload: Bytes) -> Result<(), ReactorError> {
        self.send((peer, channel, payload))
            .await
            .map_err(|_| ReactorError::Closed)
    }
}
