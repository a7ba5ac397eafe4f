//! Listener implementation for the daemon channel.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use dbgbridge_config::ChannelEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(25);
/// Fixed backoff after a failed bind or accept.
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// A bound channel endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: ChannelEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds the endpoint and switches it to non-blocking accepts.
    pub(crate) fn bind(endpoint: &ChannelEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            ChannelEndpoint::Tcp { host, port } => {
                ListenerKind::Tcp(bind_tcp(endpoint, host, *port)?)
            }
            ChannelEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    ListenerKind::Unix(bind_unix(endpoint, path.as_std_path())?)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(ListenerError::Unsupported {
                        channel: endpoint.clone(),
                    });
                }
            }
        };
        let bound = Self {
            endpoint: endpoint.clone(),
            listener,
        };
        if let Err(source) = bound.set_nonblocking() {
            bound.cleanup();
            return Err(ListenerError::Bind {
                channel: endpoint.clone(),
                source,
            });
        }
        Ok(bound)
    }

    /// Address of a TCP listener; Unix listeners report `None`.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match &self.listener {
            ListenerKind::Tcp(tcp) => tcp.accept().map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            ListenerKind::Unix(unix) => unix
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => {
                // Some platforms let accepted sockets inherit the listener's
                // non-blocking flag.
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        cleanup_unix_socket(&self.endpoint);
    }
}

/// Handle to the background accept thread.
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    local_addr: Arc<OnceLock<SocketAddr>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Starts the accept loop.
    ///
    /// `initial` is the result of a bind attempted by the caller. When it is
    /// `None` the loop keeps retrying the bind every [`RETRY_BACKOFF`] until it
    /// succeeds or shutdown is requested.
    pub(crate) fn spawn(
        endpoint: ChannelEndpoint,
        initial: Option<SocketListener>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let local_addr = Arc::new(OnceLock::new());
        if let Some(addr) = initial.as_ref().and_then(SocketListener::local_addr) {
            let _ = local_addr.set(addr);
        }
        let accept_loop = AcceptLoop {
            endpoint,
            current: initial,
            retry: BindRetry::default(),
            shutdown: Arc::clone(&shutdown),
            local_addr: Arc::clone(&local_addr),
            handler,
        };
        let handle = thread::Builder::new()
            .name("dbgbridge-accept".to_owned())
            .spawn(move || accept_loop.run())?;
        Ok(Self {
            shutdown,
            local_addr,
            handle: Some(handle),
        })
    }

    /// TCP address once the listener is bound.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Progress of a deferred bind.
#[derive(Debug, Default)]
struct BindRetry {
    attempts: u32,
    last_failure: Option<String>,
}

impl BindRetry {
    /// Records a failure; returns `true` when it differs from the previous one.
    fn record(&mut self, error: &ListenerError) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        let message = error.to_string();
        let changed = self.last_failure.as_deref() != Some(message.as_str());
        self.last_failure = Some(message);
        changed
    }
}

struct AcceptLoop {
    endpoint: ChannelEndpoint,
    current: Option<SocketListener>,
    retry: BindRetry,
    shutdown: Arc<AtomicBool>,
    local_addr: Arc<OnceLock<SocketAddr>>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(mut self) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            bound = self.current.is_some(),
            "channel listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(listener) = self.current.as_ref() else {
                self.retry_bind();
                continue;
            };
            match listener.accept() {
                Ok(Some(stream)) => {
                    last_error = None;
                    debug!(
                        target: LISTENER_TARGET,
                        transport = stream.transport(),
                        "accepted connection"
                    );
                    self.handler.handle(stream);
                }
                Ok(None) => {
                    self.handler.idle();
                    thread::sleep(ACCEPT_POLL);
                }
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "channel accept error"
                        );
                    }
                    last_error = Some(kind);
                    self.pause(RETRY_BACKOFF);
                }
            }
        }

        if let Some(listener) = self.current.take() {
            listener.cleanup();
        }
        info!(target: LISTENER_TARGET, endpoint = %self.endpoint, "channel listener stopped");
    }

    fn retry_bind(&mut self) {
        match SocketListener::bind(&self.endpoint) {
            Ok(listener) => {
                if let Some(addr) = listener.local_addr() {
                    let _ = self.local_addr.set(addr);
                }
                info!(
                    target: LISTENER_TARGET,
                    endpoint = %self.endpoint,
                    attempts = self.retry.attempts,
                    "channel bound after retry"
                );
                self.retry = BindRetry::default();
                self.current = Some(listener);
            }
            Err(error) => {
                if self.retry.record(&error) {
                    warn!(
                        target: LISTENER_TARGET,
                        endpoint = %self.endpoint,
                        error = %error,
                        transient = error.is_transient(),
                        attempts = self.retry.attempts,
                        "channel bind failed; retrying"
                    );
                } else {
                    debug!(
                        target: LISTENER_TARGET,
                        endpoint = %self.endpoint,
                        attempts = self.retry.attempts,
                        "channel bind still failing"
                    );
                }
                self.pause(RETRY_BACKOFF);
            }
        }
    }

    /// Sleeps for `duration` but wakes early when shutdown is requested.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(ACCEPT_POLL.min(deadline - now));
        }
    }
}

fn bind_tcp(
    endpoint: &ChannelEndpoint,
    host: &str,
    port: u16,
) -> Result<TcpListener, ListenerError> {
    let resolved = (host, port)
        .to_socket_addrs()
        .and_then(|mut addrs| {
            addrs.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
            })
        })
        .map_err(|source| ListenerError::Resolve {
            channel: endpoint.clone(),
            source,
        })?;
    TcpListener::bind(resolved).map_err(|source| ListenerError::Bind {
        channel: endpoint.clone(),
        source,
    })
}

/// Binds `path`, clearing a socket file left behind by a dead daemon.
#[cfg(unix)]
fn bind_unix(endpoint: &ChannelEndpoint, path: &Path) -> Result<UnixListener, ListenerError> {
    let stale = |source| ListenerError::StaleSocket {
        channel: endpoint.clone(),
        source,
    };
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(stale)?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::NotASocket {
                channel: endpoint.clone(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_live) => {
                return Err(ListenerError::InUse {
                    channel: endpoint.clone(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(stale)?;
            }
            Err(error) => return Err(stale(error)),
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        channel: endpoint.clone(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &ChannelEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
