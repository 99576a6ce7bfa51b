use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Constructed, read loop not started yet
    Created,

    /// Read and write loops running
    Running,

    /// Stream closed or flushed, never usable again
    Stopped,
}

impl PeerState {
    fn to_u8(self) -> u8 {
        match self {
            PeerState::Created => 0,
            PeerState::Running => 1,
            PeerState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PeerState::Created,
            1 => PeerState::Running,
            _ => PeerState::Stopped,
        }
    }
}

/// Peer state shared between the peer handle and its tasks
#[derive(Debug)]
pub struct AtomicPeerState(AtomicU8);

impl AtomicPeerState {
    pub fn new() -> Self {
        Self(AtomicU8::new(PeerState::Created.to_u8()))
    }

    pub fn get(&self) -> PeerState {
        PeerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Created -> Running. Returns false if the peer was not in Created.
    pub fn start(&self) -> bool {
        self.0
            .compare_exchange(
                PeerState::Created.to_u8(),
                PeerState::Running.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to Stopped. Returns the previous state.
    pub fn stop(&self) -> PeerState {
        PeerState::from_u8(self.0.swap(PeerState::Stopped.to_u8(), Ordering::AcqRel))
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == PeerState::Stopped
    }
}

impl Default for AtomicPeerState {
    fn default() -> Self {
        Self::new()
    }
}
