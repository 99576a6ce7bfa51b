use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Number of channel ids owned by each module
pub const CHANNELS_PER_MODULE: i32 = 16;

/// Well known consensus channels
pub mod channels {
    pub const CONSENSUS_STATE: i32 = 0x00;
    pub const CONSENSUS_PROPOSAL: i32 = 0x01;
    pub const CONSENSUS_VOTE: i32 = 0x02;
    pub const CONSENSUS_TIMEOUT: i32 = 0x03;
    pub const MEMPOOL_TX: i32 = 0x10;
    pub const STATE_SYNC_REQUEST: i32 = 0x20;
    pub const STATE_SYNC_RESPONSE: i32 = 0x21;
}

/// Consensus-layer functionality a reactor can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    /// Proposals, votes and timeouts
    Consensus,

    /// Transaction gossip
    Mempool,

    /// Catch-up of committed state
    StateSync,
}

impl Module {
    /// All modules in channel order
    pub const ALL: [Module; 3] = [Module::Consensus, Module::Mempool, Module::StateSync];

    /// Position of the module's channel block
    fn index(self) -> i32 {
        match self {
            Module::Consensus => 0,
            Module::Mempool => 1,
            Module::StateSync => 2,
        }
    }

    /// Channel ids owned by this module
    pub fn channels(self) -> RangeInclusive<i32> {
        let start = self.index() * CHANNELS_PER_MODULE;
        start..=start + CHANNELS_PER_MODULE - 1
    }

    /// Module owning `channel`, if any
    pub fn owner_of(channel: i32) -> Option<Module> {
        Module::ALL.into_iter().find(|m| m.channels().contains(&channel))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Module::Consensus => "consensus",
            Module::Mempool => "mempool",
            Module::StateSync => "state-sync",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ownership() {
        assert_eq!(Module::owner_of(channels::CONSENSUS_VOTE), Some(Module::Consensus));
        assert_eq!(Module::owner_of(15), Some(Module::Consensus));
        assert_eq!(Module::owner_of(channels::MEMPOOL_TX), Some(Module::Mempool));
        assert_eq!(Module::owner_of(31), Some(Module::Mempool));
        assert_eq!(Module::owner_of(channels::STATE_SYNC_RESPONSE), Some(Module::StateSync));
        assert_eq!(Module::owner_of(47), Some(Module::StateSync));
    }

    #[test]
    fn test_unowned_channels() {
        assert_eq!(Module::owner_of(-1), None);
        assert_eq!(Module::owner_of(48), None);
        assert_eq!(Module::owner_of(i32::MAX), None);
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        for module in Module::ALL {
            for channel in module.channels() {
                assert_eq!(Module::owner_of(channel), Some(module));
            }
        }
    }
}
