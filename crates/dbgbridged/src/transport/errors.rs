//! Bind failures for the daemon channel.

use std::io;

use thiserror::Error;

use dbgbridge_config::ChannelEndpoint;

/// Why the channel could not be bound or served.
///
/// A failed bind at start-up is deferred rather than fatal: the accept loop
/// keeps retrying. [`ListenerError::is_transient`] tells apart failures that
/// clear by themselves, such as a port still held by a previous daemon, from
/// ones that need an operator to change the configuration or the filesystem.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host did not resolve to an address.
    #[error("cannot resolve channel {channel}: {source}")]
    Resolve {
        /// Channel being bound.
        channel: ChannelEndpoint,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// The operating system refused the bind or its non-blocking setup.
    #[error("cannot bind channel {channel}: {source}")]
    Bind {
        /// Channel being bound.
        channel: ChannelEndpoint,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another process still answers on the socket path.
    #[cfg(unix)]
    #[error("channel {channel} is served by another process")]
    InUse {
        /// Channel being bound.
        channel: ChannelEndpoint,
    },
    /// The socket path holds something other than a socket.
    #[cfg(unix)]
    #[error("channel {channel} points at a file that is not a socket")]
    NotASocket {
        /// Channel being bound.
        channel: ChannelEndpoint,
    },
    /// A leftover socket file could not be inspected or removed.
    #[cfg(unix)]
    #[error("cannot clear stale socket for channel {channel}: {source}")]
    StaleSocket {
        /// Channel being bound.
        channel: ChannelEndpoint,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Unix channels were configured on a host without them.
    #[cfg(not(unix))]
    #[error("channel {channel} needs unix socket support")]
    Unsupported {
        /// Channel being bound.
        channel: ChannelEndpoint,
    },
    /// The accept thread panicked.
    #[error("channel accept thread panicked")]
    ThreadPanic,
}

impl ListenerError {
    /// Whether a later retry can succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Bind { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable
            ),
            #[cfg(unix)]
            Self::InUse { .. } => true,
            _ => false,
        }
    }
}
