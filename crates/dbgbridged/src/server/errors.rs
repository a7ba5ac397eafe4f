//! Errors surfaced by the command server.

use std::io;

use thiserror::Error;

use crate::dispatch::RegistryError;
use crate::transport::ListenerError;

/// Errors surfaced while configuring, starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,
    /// A handler is already registered under this name.
    #[error("command '{name}' is already registered")]
    DuplicateCommand {
        /// Name that was registered twice.
        name: String,
    },
    /// Handlers cannot be added once the server has started.
    #[error("cannot register '{name}': the server has already started")]
    RegistryFrozen {
        /// Name that arrived too late.
        name: String,
    },
    /// Command names must contain something other than whitespace.
    #[error("command names must not be empty")]
    EmptyCommandName,
    /// A listener or connection thread panicked.
    #[error("{count} server thread(s) panicked during shutdown")]
    ThreadPanic {
        /// Threads that panicked.
        count: usize,
    },
    /// The accept loop failed.
    #[error("channel listener failed: {source}")]
    Listener {
        /// Listener failure.
        #[source]
        source: ListenerError,
    },
    /// A server thread could not be spawned.
    #[error("failed to spawn server thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl From<RegistryError> for ServerError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Duplicate { name } => Self::DuplicateCommand { name },
            RegistryError::Frozen { name } => Self::RegistryFrozen { name },
            RegistryError::EmptyName => Self::EmptyCommandName,
        }
    }
}

impl From<ListenerError> for ServerError {
    fn from(source: ListenerError) -> Self {
        match source {
            ListenerError::ThreadPanic => Self::ThreadPanic { count: 1 },
            source => Self::Listener { source },
        }
    }
}
