//! Engine configuration types.
//!
//! `EngineConfig` mirrors `flowline.toml`: worker pool sizing, retry
//! defaults and logging output. Every field has a default so an empty file
//! (or none at all) yields a usable engine.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a flowline engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads backing branch, fork and async dispatch work.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name given to worker threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Defaults applied to `retry` steps that do not set their own policy.
    #[serde(default)]
    pub retry: RetryDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_threads() -> usize {
    32
}

fn default_thread_name() -> String {
    "flowline-worker".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            retry: RetryDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Backoff defaults for retry steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDefaults {
    /// Initial delay between attempts in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// `delay += multiplier * delay` after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum number of attempts.
    #[serde(default = "default_times")]
    pub times: u32,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_times() -> u32 {
    2
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            multiplier: default_multiplier(),
            times: default_times(),
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}
