//! Helpers shared by the socket-level suites.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use dbgbridge_config::ChannelEndpoint;

use crate::dispatch::CommandError;
use crate::health::HealthReporter;
use crate::protocol::{Reply, Request};
use crate::server::{ConnectionId, Server};
use crate::transport::{ListenerError, connect_with_retry};

pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback endpoint on an ephemeral port.
pub(crate) fn loopback() -> ChannelEndpoint {
    ChannelEndpoint::tcp("127.0.0.1", 0)
}

/// Handler answering `ok` to every request.
pub(crate) fn echo_test(_request: &Request) -> Result<Reply, CommandError> {
    Ok(Reply::output("ok"))
}

/// Handler answering with the `text` argument, or the request id.
pub(crate) fn echo_args(request: &Request) -> Result<Reply, CommandError> {
    let text = request
        .arg_str("text")
        .map_or_else(|| request.id().to_string(), str::to_owned);
    Ok(Reply::output(text))
}

/// Starts `server` on loopback and returns its bound address.
pub(crate) fn start_on_loopback(server: &Server) -> SocketAddr {
    server.start(&loopback()).expect("server should start");
    wait_for(|| server.local_addr()).expect("server should report its address")
}

/// Polls `check` until it yields a value or two seconds pass.
pub(crate) fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Line-oriented client speaking the daemon protocol.
pub(crate) struct TestClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TestClient {
    pub(crate) fn connect(addr: SocketAddr) -> Self {
        let stream = connect_with_retry(addr, Duration::from_secs(2)).expect("connect to server");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        Self {
            writer: stream,
            reader,
        }
    }

    pub(crate) fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).expect("write frame");
        self.writer.write_all(b"\n").expect("write delimiter");
        self.writer.flush().expect("flush frame");
    }

    pub(crate) fn send_command(&mut self, id: i64, command: &str, args: Value) {
        let frame = json!({"type": "command", "id": id, "command": command, "args": args});
        self.send_line(&frame.to_string());
    }

    /// Next raw line without its delimiter, or `None` at end of stream.
    pub(crate) fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches('\n').to_owned()),
            Err(error) => panic!("read failed: {error}"),
        }
    }

    pub(crate) fn read_message(&mut self) -> Value {
        let line = self.read_line().expect("server closed the connection");
        serde_json::from_str(&line).unwrap_or_else(|error| panic!("bad frame {line:?}: {error}"))
    }

    /// Closes the write half so the server sees end of stream.
    pub(crate) fn finish_writing(&self) {
        self.writer
            .shutdown(std::net::Shutdown::Write)
            .expect("shut down write half");
    }
}

/// Reporter that records lifecycle events as short strings.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl HealthReporter for RecordingReporter {
    fn server_starting(&self, endpoint: &ChannelEndpoint) {
        self.record(format!("starting {endpoint}"));
    }

    fn server_started(&self, endpoint: &ChannelEndpoint, bound: bool) {
        self.record(format!("started {endpoint} bound={bound}"));
    }

    fn bind_deferred(&self, endpoint: &ChannelEndpoint, error: &ListenerError) {
        self.record(format!("deferred {endpoint}: {error}"));
    }

    fn server_stopped(&self, connections_joined: usize) {
        self.record(format!("stopped joined={connections_joined}"));
    }

    fn connection_opened(&self, id: ConnectionId) {
        self.record(format!("opened {id}"));
    }

    fn connection_closed(&self, id: ConnectionId) {
        self.record(format!("closed {id}"));
    }
}
