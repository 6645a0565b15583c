//! CLI command implementations.

pub mod checks;
pub mod config;
pub mod incidents;
pub mod recover;
pub mod status;
