//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! The engine emits one `flow` span per flow call and events tagged with
//! `flow_id`, `session_id` and `action`. This module installs a subscriber
//! that renders them.
//!
//! ```no_run
//! use flowline_types::config::LoggingConfig;
//!
//! flowline_observe::tracing_setup::init_tracing(&LoggingConfig::default()).unwrap();
//! ```

use std::sync::OnceLock;

use flowline_types::config::LoggingConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber described by `config`.
///
/// Output is human-readable unless `json` is set; flow spans report their
/// timing on close. With `otel` set, spans are also exported through
/// OpenTelemetry to stdout. `RUST_LOG` overrides the default `info` filter.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let otel_layer = config.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("flowline");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    let registry = tracing_subscriber::registry().with(env_filter()).with(otel_layer);
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }
    Ok(())
}

/// Flush pending spans and shut the OpenTelemetry provider down.
///
/// A no-op when OpenTelemetry was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("Warning: OTel tracer provider shutdown error: {e}");
    }
}
