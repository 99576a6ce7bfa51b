pub mod module;
pub mod direction;
