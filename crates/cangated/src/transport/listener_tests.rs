//! Tests for the socket listener.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cangate_config::SocketEndpoint;
use rstest::{fixture, rstest};

use super::{ConnectionHandler, CountingHandler, ListenerError, SocketListener};

struct CountingFixture {
    count: Arc<AtomicUsize>,
    handler: Arc<dyn ConnectionHandler>,
}

#[fixture]
fn counting_fixture() -> CountingFixture {
    let (count, handler) = CountingHandler::new();
    CountingFixture { count, handler }
}

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
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
fn tcp_listener_serves_concurrent_clients(
    tcp_endpoint: SocketEndpoint,
    counting_fixture: CountingFixture,
) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let CountingFixture { count, handler } = counting_fixture;
    let handle = listener.start(handler).expect("start listener");

    let mut first = TcpStream::connect(addr).expect("connect first client");
    let mut second = TcpStream::connect(addr).expect("connect second client");
    assert!(wait_for_count(&count, 2), "expected two connections");

    second.write_all(b"two\n").expect("write second");
    first.write_all(b"one\n").expect("write first");
    let mut reply = String::new();
    BufReader::new(&mut second)
        .read_line(&mut reply)
        .expect("read second reply");
    assert_eq!(reply, "two\n");

    handle.shutdown();
    handle.join().expect("join listener");
}

#[cfg(unix)]
#[fixture]
fn unix_tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

#[cfg(unix)]
#[rstest]
fn unix_listener_cleans_stale_socket_files(
    unix_tempdir: tempfile::TempDir,
    counting_fixture: CountingFixture,
) {
    let path = unix_tempdir.path().join("cangated.sock");
    {
        let _stale = std::os::unix::net::UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let handle = listener.start(counting_fixture.handler).expect("start listener");

    std::os::unix::net::UnixStream::connect(&path).expect("connect unix client");
    assert!(wait_for_count(&counting_fixture.count, 1), "expected a connection");

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
    let path = unix_tempdir.path().join("cangated.sock");
    let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[cfg(unix)]
#[rstest]
fn unix_listener_refuses_regular_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("cangated.sock");
    std::fs::write(&path, b"not a socket").expect("write file");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
}
