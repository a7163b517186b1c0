//! Storage infrastructure: the machine runtime's TOML configuration file.

pub mod config;
