//! One client connection and the worker that serves it.
//!
//! A worker moves through `Connected → Serving → Draining → Closed`. While
//! serving it alternates between writing at most one queued message and
//! polling the stream for inbound bytes, so queued pushes keep flowing between
//! requests. Inbound frames are dispatched one at a time on the worker thread;
//! a slow command therefore delays later requests on the same connection but
//! never other connections.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::health::HealthReporter;
use crate::protocol::{
    CodecError, ErrorCategory, ErrorCode, Failure, FrameBuffer, Outbound, READ_CHUNK_BYTES,
    Response, encode,
};
use crate::transport::ConnectionStream;

use super::SERVER_TARGET;
use super::outbox::Outbox;

/// Longest wait on the outgoing queue per loop iteration.
pub(crate) const QUEUE_WAIT: Duration = Duration::from_millis(100);

/// Read timeout used to poll for inbound bytes.
pub(crate) const READ_POLL: Duration = Duration::from_millis(10);

/// Write timeout; a stalled write is retried only while the connection is live.
pub(crate) const WRITE_POLL: Duration = Duration::from_millis(100);

/// Identifies a live connection for targeted pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value, unique per server instance.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State shared between a connection worker and the server.
#[derive(Debug)]
pub(crate) struct Connection {
    id: ConnectionId,
    active: AtomicBool,
    outbox: Outbox,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            outbox: Outbox::default(),
        }
    }

    pub(crate) const fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clears the liveness flag and wakes the worker.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.outbox.wake();
    }

    /// Queues `message` unless the connection is no longer live.
    pub(crate) fn enqueue(&self, message: Outbound) -> bool {
        if !self.is_active() {
            return false;
        }
        self.outbox.push(message);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Serving,
    Draining,
    Closed,
}

/// Drives one connection until it closes.
pub(crate) struct ConnectionWorker {
    connection: Arc<Connection>,
    stream: ConnectionStream,
    dispatcher: Dispatcher,
    frames: FrameBuffer,
    reporter: Arc<dyn HealthReporter>,
}

impl ConnectionWorker {
    pub(crate) fn new(
        connection: Arc<Connection>,
        stream: ConnectionStream,
        dispatcher: Dispatcher,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            connection,
            stream,
            dispatcher,
            frames: FrameBuffer::new(),
            reporter,
        }
    }

    pub(crate) fn run(mut self) {
        let id = self.connection.id();
        self.reporter.connection_opened(id);
        let mut state = ConnectionState::Connected;
        while state != ConnectionState::Closed {
            state = match state {
                ConnectionState::Connected => self.configure(),
                ConnectionState::Serving => self.serve_once(),
                ConnectionState::Draining => self.drain(),
                ConnectionState::Closed => ConnectionState::Closed,
            };
        }
        self.connection.deactivate();
        self.stream.close();
        self.reporter.connection_closed(id);
    }

    fn configure(&self) -> ConnectionState {
        let configured = self
            .stream
            .set_read_timeout(Some(READ_POLL))
            .and_then(|()| self.stream.set_write_timeout(Some(WRITE_POLL)));
        match configured {
            Ok(()) => ConnectionState::Serving,
            Err(error) => {
                warn!(
                    target: SERVER_TARGET,
                    connection = %self.connection.id(),
                    %error,
                    "failed to configure connection stream"
                );
                ConnectionState::Closed
            }
        }
    }

    fn serve_once(&mut self) -> ConnectionState {
        if !self.connection.is_active() {
            return ConnectionState::Closed;
        }
        if let Some(message) = self.connection.outbox.pop_timeout(QUEUE_WAIT)
            && let Err(error) = self.write(&message, Patience::WhileActive)
        {
            return self.after_io_failure("write", &error);
        }
        if !self.connection.is_active() {
            return ConnectionState::Closed;
        }

        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                debug!(target: SERVER_TARGET, connection = %self.connection.id(), "peer closed");
                ConnectionState::Draining
            }
            Ok(read) => {
                self.frames.extend(&chunk[..read]);
                self.process_frames()
            }
            Err(error) if is_idle(&error) => ConnectionState::Serving,
            Err(error) => self.after_io_failure("read", &error),
        }
    }

    fn process_frames(&mut self) -> ConnectionState {
        loop {
            match self.frames.next_frame() {
                Ok(Some(frame)) => {
                    let response = self.dispatcher.dispatch_frame(&frame);
                    self.connection.outbox.push(response.into());
                }
                Ok(None) => return ConnectionState::Serving,
                Err(error) => {
                    warn!(
                        target: SERVER_TARGET,
                        connection = %self.connection.id(),
                        %error,
                        "unreadable inbound frame; closing connection"
                    );
                    self.connection.outbox.push(oversize_response(&error).into());
                    return ConnectionState::Draining;
                }
            }
        }
    }

    /// Flushes whatever is still queued, stopping at the first write failure
    /// or stalled write.
    fn drain(&mut self) -> ConnectionState {
        for message in self.connection.outbox.drain() {
            if let Err(error) = self.write(&message, Patience::Never) {
                debug!(
                    target: SERVER_TARGET,
                    connection = %self.connection.id(),
                    %error,
                    "dropping queued messages for closed peer"
                );
                break;
            }
        }
        ConnectionState::Closed
    }

    fn write(&mut self, message: &Outbound, patience: Patience) -> io::Result<()> {
        let bytes = match encode(message) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(
                    target: SERVER_TARGET,
                    connection = %self.connection.id(),
                    %error,
                    "failed to encode outbound message"
                );
                return Ok(());
            }
        };
        let mut pending = bytes.as_slice();
        while !pending.is_empty() {
            match self.stream.write(pending) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => pending = pending.get(written..).unwrap_or_default(),
                Err(error) if is_idle(&error) && patience.retries(&self.connection) => {}
                Err(error) => return Err(error),
            }
        }
        self.stream.flush()
    }

    fn after_io_failure(&self, operation: &'static str, error: &io::Error) -> ConnectionState {
        if !self.connection.is_active() {
            debug!(
                target: SERVER_TARGET,
                connection = %self.connection.id(),
                operation,
                %error,
                "abandoning I/O on a deactivated connection"
            );
            ConnectionState::Closed
        } else if is_disconnect(error) {
            debug!(
                target: SERVER_TARGET,
                connection = %self.connection.id(),
                operation,
                %error,
                "peer disconnected"
            );
            ConnectionState::Draining
        } else {
            warn!(
                target: SERVER_TARGET,
                connection = %self.connection.id(),
                operation,
                %error,
                "connection I/O failed"
            );
            ConnectionState::Closed
        }
    }
}

/// Whether a write that timed out may be retried.
#[derive(Debug, Clone, Copy)]
enum Patience {
    /// Retry until the connection is deactivated.
    WhileActive,
    /// Give up on the first timeout.
    Never,
}

impl Patience {
    fn retries(self, connection: &Connection) -> bool {
        matches!(self, Self::WhileActive) && connection.is_active()
    }
}

fn oversize_response(error: &CodecError) -> Response {
    Response::protocol_error(
        None,
        None,
        Failure::new(
            ErrorCode::InvalidMessage,
            ErrorCategory::ResourceExhaustion,
            format!("error processing message: {error}"),
        )
        .with_suggestion("Split the request so each message stays under the frame limit."),
    )
}

fn is_idle(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::protocol::Notification;

    #[rstest]
    #[case(io::ErrorKind::WouldBlock, true)]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::BrokenPipe, false)]
    fn classifies_idle_reads(#[case] kind: io::ErrorKind, #[case] idle: bool) {
        assert_eq!(is_idle(&io::Error::from(kind)), idle);
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset, true)]
    #[case(io::ErrorKind::BrokenPipe, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    #[case(io::ErrorKind::InvalidData, false)]
    fn classifies_disconnects(#[case] kind: io::ErrorKind, #[case] disconnect: bool) {
        assert_eq!(is_disconnect(&io::Error::from(kind)), disconnect);
    }

    #[test]
    fn stalled_writes_retry_only_while_live() {
        let connection = Connection::new(ConnectionId::new(4));
        assert!(Patience::WhileActive.retries(&connection));
        assert!(!Patience::Never.retries(&connection));
        connection.deactivate();
        assert!(!Patience::WhileActive.retries(&connection));
    }

    #[test]
    fn inactive_connections_refuse_messages() {
        let connection = Connection::new(ConnectionId::new(3));
        let message: Outbound = Notification::new("tick", json!(1)).into();
        assert!(connection.enqueue(message.clone()));
        connection.deactivate();
        assert!(!connection.enqueue(message));
        assert_eq!(connection.outbox.len(), 1);
    }

    #[test]
    fn ids_render_with_prefix() {
        assert_eq!(ConnectionId::new(12).to_string(), "conn-12");
    }
}
