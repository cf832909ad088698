//! Top-level error for the sync layer and the `taskdeck` binary.

use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use crate::session::SessionError;
use crate::telemetry::TelemetryError;
use taskdeck_core::ApiFailure;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiFailure),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
