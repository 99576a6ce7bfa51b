// Consensus-side collaborators of the switch
// Provides the write-ahead log and the message contract used by reactors

pub mod msg_info;
pub mod wal;

// Re-export main components
pub use msg_info::MsgInfo;
pub use wal::{FileWal, Wal, WalMessage, WalReader};
