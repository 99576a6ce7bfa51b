// HotStuff P2P - the peer-to-peer switch underneath a BFT consensus engine

pub mod config;
pub mod error;
pub mod network;
pub mod state;
pub mod util;

pub use error::{P2pError, Result};
pub use network::service::Switch;

// Initialize logging
pub fn init_logger() {
    env_logger::init();
}

/// Initialize logging with a default filter used when `RUST_LOG` is unset
pub fn init_logger_with_level(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
