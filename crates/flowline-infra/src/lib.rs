//! Host-side plumbing for flowline.
//!
//! Loads `flowline.toml` into an [`EngineConfig`](flowline_types::config::EngineConfig)
//! and builds the tokio runtime that backs an engine's worker pool.

pub mod config;
pub mod runtime;
