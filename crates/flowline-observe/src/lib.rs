//! Tracing setup for hosts embedding flowline.

pub mod tracing_setup;
