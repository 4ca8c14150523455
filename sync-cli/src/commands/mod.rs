//! CLI command implementations.

pub mod check_config;
pub mod derive;
pub mod table;
