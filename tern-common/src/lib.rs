//! Shared primitives used by all `tern` crates.
//!
//! This crate is intentionally minimal and dependency-light, so it can sit at the bottom of the
//! dependency graph.

pub mod async_log;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
