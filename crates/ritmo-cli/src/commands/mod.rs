//! CLI command implementations.

pub mod devices;
pub mod export;
pub mod function;
pub mod play;
