// Peer management module

pub mod state;
pub mod handler;
pub mod registry;
pub mod broadcaster;
