//! Errors surfaced while launching or supervising the daemon.

use std::sync::Arc;

use thiserror::Error;

use ortho_config::OrthoError;

use dbgbridge_config::ChannelPreparationError;

use crate::server::ServerError;
use crate::telemetry::TelemetryError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Subscriber installation error.
        #[source]
        source: TelemetryError,
    },
    /// Preparing the channel directory failed.
    #[error("failed to prepare daemon channel: {source}")]
    Channel {
        /// Underlying filesystem error.
        #[source]
        source: ChannelPreparationError,
    },
    /// Registering commands or running the server failed.
    #[error("command server failed: {source}")]
    Server {
        /// Server failure.
        #[source]
        source: ServerError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Signal listener failure.
        #[source]
        source: ShutdownError,
    },
    /// A supervision thread could not be spawned.
    #[error("failed to spawn supervision thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ChannelPreparationError> for LaunchError {
    fn from(source: ChannelPreparationError) -> Self {
        Self::Channel { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
