//! Shared data types for flowline.
//!
//! This crate holds the plain data the runtime and its hosts exchange:
//! flow identities, step kinds, the wire document used for export/import,
//! engine configuration, metrics records and the `FlowError` taxonomy.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod document;
pub mod error;
pub mod flow;
pub mod metrics;
