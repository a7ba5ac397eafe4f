//! Tests for the channel listener.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use dbgbridge_config::ChannelEndpoint;

use super::listener::{ListenerHandle, RETRY_BACKOFF, SocketListener};
use super::{ConnectionHandler, CountingHandler, ListenerError, connect_with_retry};

#[derive(Clone)]
struct CountingFixture {
    count: Arc<AtomicUsize>,
    handler: Arc<CountingHandler>,
}

#[fixture]
fn counting_fixture() -> CountingFixture {
    let (count, handler) = CountingHandler::new();
    CountingFixture { count, handler }
}

#[fixture]
fn tcp_endpoint() -> ChannelEndpoint {
    ChannelEndpoint::tcp("127.0.0.1", 0)
}

fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[rstest]
fn tcp_listener_accepts_connections(
    tcp_endpoint: ChannelEndpoint,
    counting_fixture: CountingFixture,
) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let CountingFixture { count, handler } = counting_fixture;
    let shared: Arc<dyn ConnectionHandler> = handler;
    let handle =
        ListenerHandle::spawn(tcp_endpoint, Some(listener), shared).expect("start listener");
    let addr = handle.local_addr().expect("listener should report local address");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn listener_binds_after_port_is_released(counting_fixture: CountingFixture) {
    let blocker = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = blocker.local_addr().expect("blocker address").port();
    let endpoint = ChannelEndpoint::tcp("127.0.0.1", port);
    assert!(SocketListener::bind(&endpoint).is_err(), "port should be busy");

    let CountingFixture { count, handler } = counting_fixture;
    let handle = ListenerHandle::spawn(endpoint, None, handler).expect("start listener");
    assert!(handle.local_addr().is_none(), "nothing bound yet");
    drop(blocker);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    connect_with_retry(addr, RETRY_BACKOFF * 4).expect("connect after rebind");
    assert!(wait_for_count(&count, 1), "expected the retried bind to accept");
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn shutdown_interrupts_bind_backoff(counting_fixture: CountingFixture) {
    let blocker = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = blocker.local_addr().expect("blocker address").port();
    let endpoint = ChannelEndpoint::tcp("127.0.0.1", port);

    let handle =
        ListenerHandle::spawn(endpoint, None, counting_fixture.handler).expect("start listener");
    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    handle.shutdown();
    handle.join().expect("join listener");
    assert!(started.elapsed() < RETRY_BACKOFF, "join waited for the full backoff");
}

#[cfg(unix)]
#[fixture]
fn unix_tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

#[cfg(unix)]
#[rstest]
fn unix_listener_cleans_stale_socket_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("dbgbridged.sock");
    {
        let _stale = std::os::unix::net::UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = ChannelEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let (_, handler) = CountingHandler::new();
    let handle = ListenerHandle::spawn(endpoint, Some(listener), handler).expect("start listener");

    std::os::unix::net::UnixStream::connect(&path).expect("connect unix client");

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(
        !path.exists(),
        "listener should remove unix socket on shutdown"
    );
}

#[cfg(unix)]
#[rstest]
fn unix_listener_rejects_in_use_socket(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("dbgbridged.sock");
    let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = ChannelEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::InUse { .. }));
    assert!(error.is_transient());
}

#[cfg(unix)]
#[rstest]
fn unix_listener_refuses_to_replace_regular_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("dbgbridged.sock");
    std::fs::write(&path, b"not a socket").expect("write placeholder");

    let endpoint = ChannelEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::NotASocket { ref channel } if *channel == endpoint));
    assert!(!error.is_transient());
    assert!(path.is_file(), "regular file must be left alone");
}

#[rstest]
fn busy_tcp_port_is_a_transient_bind_failure() {
    let blocker = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = blocker.local_addr().expect("blocker address").port();
    let endpoint = ChannelEndpoint::tcp("127.0.0.1", port);

    let error = SocketListener::bind(&endpoint).expect_err("port should be busy");
    assert!(matches!(error, ListenerError::Bind { .. }), "{error:?}");
    assert!(error.is_transient());
    assert!(error.to_string().contains(&endpoint.to_string()), "{error}");
}

#[rstest]
fn unresolvable_hosts_need_operator_action() {
    let endpoint = ChannelEndpoint::tcp("dbgbridge.invalid", 9780);
    let error = SocketListener::bind(&endpoint).expect_err("host should not resolve");
    assert!(matches!(error, ListenerError::Resolve { .. }), "{error:?}");
    assert!(!error.is_transient());
}
