//! The local channel the daemon listens on.
//!
//! Clients reach the daemon through a channel private to the host: a Unix
//! domain socket under the user's runtime directory, or a loopback TCP port
//! where Unix sockets are unavailable. Channels are written as
//! `unix:///run/user/1000/dbgbridge/dbgbridged.sock` or `tcp://127.0.0.1:9780`;
//! a bare absolute path is shorthand for the Unix form.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

#[cfg(not(unix))]
use crate::defaults::DEFAULT_TCP_PORT;

/// Directory created under the runtime base for the socket.
const CHANNEL_DIR: &str = "dbgbridge";
/// File name of the default socket.
const SOCKET_NAME: &str = "dbgbridged.sock";

/// Where the daemon accepts connections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ChannelEndpoint {
    /// Unix domain socket.
    Unix {
        /// Socket file; its parent is created owner-only on start-up.
        path: Utf8PathBuf,
    },
    /// Loopback TCP port.
    Tcp {
        /// Loopback host name or address.
        host: String,
        /// Port to bind; `0` lets the OS choose.
        port: u16,
    },
}

impl ChannelEndpoint {
    /// Builds a Unix socket channel.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP channel.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Channel used when nothing is configured.
    ///
    /// Unix hosts get `dbgbridge/dbgbridged.sock` under the runtime directory.
    /// Without one the socket goes under the temporary directory, namespaced
    /// by effective uid so users on a shared host do not collide. Other hosts
    /// fall back to loopback TCP on [`crate::DEFAULT_TCP_PORT`].
    #[must_use]
    pub fn for_current_user() -> Self {
        #[cfg(unix)]
        {
            let mut base = match runtime_dir().and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            {
                Some(runtime) => runtime.join(CHANNEL_DIR),
                None => shared_temp_dir().join(CHANNEL_DIR).join(uid_namespace()),
            };
            base.push(SOCKET_NAME);
            Self::unix(base)
        }

        #[cfg(not(unix))]
        {
            Self::tcp("127.0.0.1", DEFAULT_TCP_PORT)
        }
    }

    /// Socket path for Unix channels.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Whether only processes on this host can reach the channel.
    #[must_use]
    pub fn is_local(&self) -> bool {
        match self {
            Self::Unix { .. } => true,
            Self::Tcp { host, .. } => is_loopback_host(host),
        }
    }

    /// Creates the socket's parent directory with owner-only permissions.
    ///
    /// TCP channels need no preparation.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelPreparationError`] when the path has no parent, the
    /// parent exists but is not a directory, or it cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), ChannelPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .ok_or_else(|| ChannelPreparationError::MissingParent {
                path: path.to_path_buf(),
            })?;

        match fs::metadata(parent.as_std_path()) {
            Ok(metadata) if metadata.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(ChannelPreparationError::NotADirectory {
                    path: parent.to_path_buf(),
                });
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ChannelPreparationError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                });
            }
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(parent.as_std_path())
            .map_err(|source| ChannelPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })
    }
}

impl Default for ChannelEndpoint {
    fn default() -> Self {
        Self::for_current_user()
    }
}

impl fmt::Display for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix://{path}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for ChannelEndpoint {
    type Err = ChannelParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        if text.starts_with('/') {
            return Ok(Self::unix(text));
        }

        let url = Url::parse(text)?;
        match url.scheme() {
            "unix" if url.path().is_empty() => Err(ChannelParseError::MissingUnixPath(text.to_owned())),
            "unix" => Ok(Self::unix(url.path())),
            "tcp" => {
                let host = url
                    .host_str()
                    .map(|name| name.trim_start_matches('[').trim_end_matches(']'))
                    .ok_or_else(|| ChannelParseError::MissingHost(text.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| ChannelParseError::MissingPort(text.to_owned()))?;
                if !is_loopback_host(host) {
                    return Err(ChannelParseError::NotLocal(host.to_owned()));
                }
                Ok(Self::tcp(host, port))
            }
            other => Err(ChannelParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

#[cfg(unix)]
fn shared_temp_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn uid_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

/// Errors encountered while parsing a [`ChannelEndpoint`] from text.
#[derive(Debug, Error)]
pub enum ChannelParseError {
    /// Scheme was neither `unix` nor `tcp`.
    #[error("unsupported channel scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// The TCP host is reachable from other machines.
    #[error("channel host '{0}' is not a loopback address")]
    NotLocal(String),
    /// Text was not a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing the socket directory.
#[derive(Debug, Error)]
pub enum ChannelPreparationError {
    /// The socket path has no parent directory.
    #[error("channel path '{path}' has no parent directory")]
    MissingParent {
        /// Offending socket path.
        path: Utf8PathBuf,
    },
    /// Something other than a directory sits where the parent should be.
    #[error("channel directory '{path}' exists and is not a directory")]
    NotADirectory {
        /// Occupied parent path.
        path: Utf8PathBuf,
    },
    /// Creating the parent directory failed.
    #[error("failed to create channel directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
