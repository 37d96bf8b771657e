//! Engine configuration loader.
//!
//! Reads `flowline.toml` from a configuration directory and deserializes it
//! into [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::Path;

use flowline_types::config::EngineConfig;

/// File name looked up inside the configuration directory.
pub const CONFIG_FILE: &str = "flowline.toml";

/// Load engine configuration from `{config_dir}/flowline.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(config_dir: &Path) -> EngineConfig {
    let config_path = config_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => {
            tracing::debug!(
                worker_threads = config.worker_threads,
                retry_times = config.retry.times,
                "loaded {}",
                config_path.display()
            );
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}
