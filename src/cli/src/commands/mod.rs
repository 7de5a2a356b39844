//! CLI command implementations.

pub mod config;
pub mod health;
pub mod operations;
pub mod role;
pub mod session;
