//! Command server: accept loop, connection workers and shutdown.
//!
//! [`Server::start`] freezes the command registry, binds the channel and
//! starts the accept loop. Each accepted stream gets its own worker thread
//! (see [`connection`]); finished workers are reaped on every accept poll.
//! [`Server::stop`] deactivates every connection, joins the accept loop and
//! then joins every worker before returning.

mod connection;
mod errors;
mod outbox;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use dbgbridge_config::ChannelEndpoint;

use crate::dispatch::{CommandHandler, CommandRegistry, Dispatcher};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::protocol::Outbound;
use crate::transport::{ConnectionHandler, ConnectionStream, ListenerHandle, SocketListener};

use self::connection::{Connection, ConnectionWorker};

pub use self::connection::ConnectionId;
pub use self::errors::ServerError;

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Serves registered commands over the configured channel.
pub struct Server {
    registry: Arc<CommandRegistry>,
    running: Arc<AtomicBool>,
    connections: Arc<ConnectionSet>,
    listener: Mutex<Option<ListenerHandle>>,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Builds a stopped server with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(StructuredHealthReporter::new()))
    }

    /// Builds a stopped server reporting lifecycle events to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            registry: Arc::new(CommandRegistry::new()),
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(ConnectionSet::default()),
            listener: Mutex::new(None),
            reporter,
        }
    }

    /// Registers `handler` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateCommand`] when the name is taken and
    /// [`ServerError::RegistryFrozen`] once the server has been started.
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: impl CommandHandler,
    ) -> Result<(), ServerError> {
        self.registry.register(name, Arc::new(handler))?;
        Ok(())
    }

    /// Sorted names of every registered command.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Binds `endpoint` and starts accepting connections.
    ///
    /// Returns as soon as the accept loop is running. A failed bind is
    /// reported and retried by the accept loop rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if the server is running and
    /// [`ServerError::Spawn`] if the accept thread cannot be started.
    pub fn start(&self, endpoint: &ChannelEndpoint) -> Result<(), ServerError> {
        let mut listener = self.lock_listener();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyRunning);
        }
        self.registry.freeze();
        self.reporter.server_starting(endpoint);

        let initial = match SocketListener::bind(endpoint) {
            Ok(bound) => Some(bound),
            Err(error) => {
                self.reporter.bind_deferred(endpoint, &error);
                None
            }
        };
        let bound = initial.is_some();
        let acceptor = Arc::new(Acceptor {
            running: Arc::clone(&self.running),
            connections: Arc::clone(&self.connections),
            dispatcher: Dispatcher::new(Arc::clone(&self.registry)),
            reporter: Arc::clone(&self.reporter),
        });
        let handle = ListenerHandle::spawn(endpoint.clone(), initial, acceptor).map_err(|source| {
            self.running.store(false, Ordering::SeqCst);
            ServerError::Spawn { source }
        })?;
        *listener = Some(handle);
        self.reporter.server_started(endpoint, bound);
        Ok(())
    }

    /// Stops accepting, closes every connection and joins every thread.
    ///
    /// Idempotent. Workers busy executing a command finish that command
    /// before they observe the shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ThreadPanic`] if any joined thread panicked.
    pub fn stop(&self) -> Result<(), ServerError> {
        let listener = self.lock_listener().take();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if !was_running && listener.is_none() {
            return Ok(());
        }
        info!(target: SERVER_TARGET, "stopping command server");

        self.connections.deactivate_all();
        let listener_result = listener.map_or(Ok(()), |handle| {
            handle.shutdown();
            handle.join()
        });
        let (joined, panicked) = self.connections.join_all();
        self.reporter.server_stopped(joined);

        listener_result?;
        if panicked > 0 {
            return Err(ServerError::ThreadPanic { count: panicked });
        }
        Ok(())
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound TCP address, when serving TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener()
            .as_ref()
            .and_then(ListenerHandle::local_addr)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.active().len()
    }

    /// Ids of the live connections, oldest first.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .active()
            .iter()
            .map(|connection| connection.id())
            .collect()
    }

    /// Queues `message` on one connection.
    ///
    /// Returns `false` when the server is stopped or the connection is gone.
    pub fn send(&self, id: ConnectionId, message: impl Into<Outbound>) -> bool {
        if !self.is_running() {
            return false;
        }
        self.connections
            .find(id)
            .is_some_and(|connection| connection.enqueue(message.into()))
    }

    /// Queues `message` on every live connection.
    ///
    /// Returns `false` when the server is stopped or no connection took the
    /// message.
    pub fn broadcast(&self, message: impl Into<Outbound>) -> bool {
        if !self.is_running() {
            return false;
        }
        let outbound = message.into();
        let mut delivered = false;
        for connection in self.connections.active() {
            delivered |= connection.enqueue(outbound.clone());
        }
        delivered
    }

    /// Entries still held by the connection set, finished or not.
    #[cfg(test)]
    pub(crate) fn tracked_connections(&self) -> usize {
        self.connections.lock().len()
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<ListenerHandle>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(target: SERVER_TARGET, %error, "server shutdown reported errors");
        }
    }
}

/// Hands accepted streams to new connection workers.
struct Acceptor {
    running: Arc<AtomicBool>,
    connections: Arc<ConnectionSet>,
    dispatcher: Dispatcher,
    reporter: Arc<dyn HealthReporter>,
}

impl ConnectionHandler for Acceptor {
    fn handle(&self, stream: ConnectionStream) {
        if !self.running.load(Ordering::SeqCst) {
            stream.close();
            return;
        }
        let connection = Arc::new(Connection::new(self.connections.next_id()));
        let id = connection.id();
        let worker = ConnectionWorker::new(
            Arc::clone(&connection),
            stream,
            self.dispatcher.clone(),
            Arc::clone(&self.reporter),
        );
        let spawned = thread::Builder::new()
            .name(format!("dbgbridge-{id}"))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => self.connections.insert(connection, handle),
            Err(error) => {
                warn!(target: SERVER_TARGET, connection = %id, %error, "failed to spawn connection worker");
            }
        }
        self.connections.reap();
    }

    fn idle(&self) {
        self.connections.reap();
    }
}

struct LiveConnection {
    connection: Arc<Connection>,
    worker: JoinHandle<()>,
}

/// Connections whose workers have not been joined yet.
#[derive(Default)]
struct ConnectionSet {
    next: AtomicU64,
    live: Mutex<Vec<LiveConnection>>,
}

impl ConnectionSet {
    fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn insert(&self, connection: Arc<Connection>, worker: JoinHandle<()>) {
        self.lock().push(LiveConnection { connection, worker });
    }

    fn find(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock()
            .iter()
            .find(|live| live.connection.id() == id)
            .map(|live| Arc::clone(&live.connection))
    }

    fn active(&self) -> Vec<Arc<Connection>> {
        self.lock()
            .iter()
            .filter(|live| live.connection.is_active())
            .map(|live| Arc::clone(&live.connection))
            .collect()
    }

    /// Joins workers that have already finished.
    fn reap(&self) {
        let finished: Vec<LiveConnection> = {
            let mut live = self.lock();
            let (done, running): (Vec<_>, Vec<_>) = live.drain(..).partition(|entry| {
                !entry.connection.is_active() && entry.worker.is_finished()
            });
            *live = running;
            done
        };
        for entry in finished {
            let id = entry.connection.id();
            if entry.worker.join().is_err() {
                warn!(target: SERVER_TARGET, connection = %id, "connection worker panicked");
            } else {
                debug!(target: SERVER_TARGET, connection = %id, "reaped connection");
            }
        }
    }

    fn deactivate_all(&self) {
        for live in self.lock().iter() {
            live.connection.deactivate();
        }
    }

    /// Deactivates and joins every worker, returning `(joined, panicked)`.
    fn join_all(&self) -> (usize, usize) {
        let entries: Vec<LiveConnection> = self.lock().drain(..).collect();
        let joined = entries.len();
        let mut panicked = 0;
        for entry in entries {
            entry.connection.deactivate();
            if entry.worker.join().is_err() {
                panicked += 1;
            }
        }
        (joined, panicked)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LiveConnection>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
