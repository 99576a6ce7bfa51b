// Reactor registration and dispatch

pub mod reactor;
pub mod table;
