//! Tracing subscriber setup for the `taskdeck` binary.
//!
//! The library only emits events; installing a subscriber is the binary's job.

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
#[error("Failed to init subscriber: {0}")]
pub struct TelemetryError(String);

/// Install the global subscriber. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| TelemetryError(e.to_string()))?;

    tracing::info!(filter = %config.filter, json = config.json, "Telemetry initialized");
    Ok(())
}
