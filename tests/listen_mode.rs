//! Listen-mode behavior: single accept, keep-open, broker/chat, access policy.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netrelay::config::DenyPolicy;
use netrelay::lifecycle::Shutdown;
use netrelay::net::{Acceptor, Connection, Network, StreamListener};
use netrelay::relay::{BoxedReader, SharedOutput};
use netrelay::security::{AccessControl, NoResolve};
use netrelay::server::{ListenEndpoint, ListenerHub};
use tokio::io::AsyncWriteExt;

mod common;

use common::{config_with, eventually, mock_acceptor, read_all, read_exact, CaptureWriter, MockAcceptor};

fn hub(config: Arc<netrelay::Config>, access: AccessControl, stdin: &'static [u8]) -> ListenerHub {
    let stdin: BoxedReader = Box::new(stdin);
    ListenerHub::new(config, Arc::new(access), Arc::new(NoResolve), stdin)
}

#[tokio::test]
async fn single_connection_relays_both_ways_over_tcp() {
    let config = config_with(|c| c.host = "127.0.0.1".into());
    let listener = StreamListener::bind(Network::Tcp4, "127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let capture = CaptureWriter::new();
    let output = SharedOutput::new(capture.clone());
    let hub = hub(config, AccessControl::permissive(), b"ping\n");
    let server = tokio::spawn(async move {
        hub.listen_for_connections(output, ListenEndpoint::Stream(listener))
            .await
    });

    let mut client = tokio::net::TcpStream::connect(addr.as_str()).await.unwrap();
    assert_eq!(read_all(&mut client).await, b"ping\n");
    client.write_all(b"pong").await.unwrap();
    client.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(capture.contents(), b"pong");
}

#[tokio::test]
async fn single_connection_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.sock");
    let path_str = path.to_str().unwrap().to_string();

    let config = config_with(|c| c.host = path_str.clone());
    let listener = StreamListener::bind(Network::Unix, &path_str).await.unwrap();

    let capture = CaptureWriter::new();
    let output = SharedOutput::new(capture.clone());
    let hub = hub(config, AccessControl::permissive(), b"");
    let server = tokio::spawn(async move {
        hub.listen_for_connections(output, ListenEndpoint::Stream(listener))
            .await
    });

    let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
    client.write_all(b"over unix").await.unwrap();
    client.shutdown().await.unwrap();
    assert!(read_all(&mut client).await.is_empty());

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(capture.contents(), b"over unix");
}

#[tokio::test]
async fn single_mode_skips_denied_peer() {
    let config = config_with(|_| {});
    let (mut acceptor, peers) = mock_acceptor();
    let access = AccessControl::from_lists(Vec::<String>::new(), vec!["10.0.0.9".to_string()]);
    let capture = CaptureWriter::new();
    let hub = hub(config, access, b"");

    let mut denied = peers.connect("10.0.0.9:4000");
    let mut allowed = peers.connect("127.0.0.1:4001");
    allowed.write_all(b"allowed").await.unwrap();
    allowed.shutdown().await.unwrap();

    hub.accept_single(SharedOutput::new(capture.clone()), &mut acceptor)
        .await
        .unwrap();
    assert_eq!(capture.contents(), b"allowed");
    assert!(read_all(&mut denied).await.is_empty());
}

#[tokio::test]
async fn keep_open_gives_stdin_to_first_connection_only() {
    let config = config_with(|c| c.listen.keep_open = true);
    let (mut acceptor, peers) = mock_acceptor();
    let capture = CaptureWriter::new();
    let hub = hub(config, AccessControl::permissive(), b"hello\n");

    let mut first = peers.connect("127.0.0.1:5001");
    let mut second = peers.connect("127.0.0.1:5002");

    let server = tokio::spawn({
        let output = SharedOutput::new(capture.clone());
        async move { hub.accept_forever(output, &mut acceptor, Some(2)).await }
    });

    assert_eq!(read_all(&mut first).await, b"hello\n");
    assert!(read_all(&mut second).await.is_empty());

    first.write_all(b"one;").await.unwrap();
    first.shutdown().await.unwrap();
    second.write_all(b"two;").await.unwrap();
    second.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = capture.text();
    assert!(text.contains("one;"));
    assert!(text.contains("two;"));
}

#[tokio::test]
async fn chat_broadcasts_to_everyone_but_the_sender() {
    let config = config_with(|c| {
        c.listen.broker = true;
        c.listen.chat = true;
    });
    let (mut acceptor, peers) = mock_acceptor();
    let capture = CaptureWriter::new();
    let hub = hub(config, AccessControl::permissive(), b"never read\n");

    let mut alice = peers.connect("127.0.0.1:6001");
    let mut bob = peers.connect("127.0.0.1:6002");
    let mut carol = peers.connect("127.0.0.1:6003");

    let server = tokio::spawn({
        let output = SharedOutput::new(capture.clone());
        async move { hub.accept_forever(output, &mut acceptor, Some(3)).await }
    });

    // all three must be registered before anyone speaks
    tokio::time::sleep(Duration::from_millis(200)).await;
    alice.write_all(b"hi\n").await.unwrap();

    let expected = b"user<1>: hi\n";
    assert_eq!(read_exact(&mut bob, expected.len()).await, expected);
    assert_eq!(read_exact(&mut carol, expected.len()).await, expected);

    for peer in [&mut alice, &mut bob, &mut carol] {
        peer.shutdown().await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(read_all(&mut alice).await.is_empty());
    assert_eq!(capture.contents(), expected);
}

#[tokio::test]
async fn deny_policy_stop_ends_the_accept_loop() {
    let config = config_with(|c| {
        c.listen.keep_open = true;
        c.listen.deny_policy = DenyPolicy::Stop;
    });
    let (mut acceptor, peers) = mock_acceptor();
    let access = AccessControl::from_lists(vec!["10.1.1.1".to_string()], Vec::<String>::new());
    let hub = hub(config, access, b"");

    let mut intruder = peers.connect("127.0.0.1:7001");
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        hub.accept_forever(SharedOutput::new(CaptureWriter::new()), &mut acceptor, None),
    )
    .await
    .unwrap();
    assert!(res.is_ok());
    assert!(read_all(&mut intruder).await.is_empty());
}

#[tokio::test]
async fn deny_policy_skip_keeps_accepting_and_does_not_count_denials() {
    let config = config_with(|c| {
        c.listen.keep_open = true;
        c.listen.deny_policy = DenyPolicy::Skip;
    });
    let (mut acceptor, peers) = mock_acceptor();
    let access = AccessControl::from_lists(Vec::<String>::new(), vec!["10.2.2.2".to_string()]);
    let capture = CaptureWriter::new();
    let hub = hub(config, access, b"");

    let mut denied = peers.connect("10.2.2.2:8001");
    let mut allowed = peers.connect("127.0.0.1:8002");
    allowed.write_all(b"let in").await.unwrap();
    allowed.shutdown().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        hub.accept_forever(SharedOutput::new(capture.clone()), &mut acceptor, Some(1)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(capture.contents(), b"let in");
    assert!(read_all(&mut denied).await.is_empty());
}

#[tokio::test]
async fn max_connections_bounds_concurrent_relays() {
    let config = config_with(|c| {
        c.listen.keep_open = true;
        c.listen.max_connections = 1;
    });
    let (mut acceptor, peers) = mock_acceptor();
    let capture = CaptureWriter::new();
    let hub = hub(config, AccessControl::permissive(), b"");

    let mut first = peers.connect("127.0.0.1:9001");
    let mut second = peers.connect("127.0.0.1:9002");
    second.write_all(b"second").await.unwrap();
    second.shutdown().await.unwrap();

    let server = tokio::spawn({
        let output = SharedOutput::new(capture.clone());
        async move { hub.accept_forever(output, &mut acceptor, Some(2)).await }
    });

    first.write_all(b"first").await.unwrap();
    eventually(|| capture.contents() == b"first").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(capture.contents(), b"first");

    first.shutdown().await.unwrap();
    eventually(|| capture.text().ends_with("second")).await;

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_stops_an_idle_accept_loop() {
    let config = config_with(|c| c.listen.keep_open = true);
    let (mut acceptor, _peers) = mock_acceptor();
    let shutdown = Shutdown::new();
    let hub = hub(config, AccessControl::permissive(), b"").with_shutdown(shutdown.subscribe());

    let server = tokio::spawn(async move {
        hub.accept_forever(SharedOutput::new(CaptureWriter::new()), &mut acceptor, None)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn listen_rejects_source_address() {
    let config = config_with(|c| {
        c.host = "127.0.0.1".into();
        c.connect.source_port = Some(4000);
    });
    let hub = hub(config, AccessControl::permissive(), b"");
    let err = hub
        .listen(SharedOutput::new(CaptureWriter::new()), Network::Tcp4, "127.0.0.1:0")
        .await
        .unwrap_err();
    assert!(matches!(err, netrelay::RelayError::Config(_)));
}

/// Counts how often the accept loop asks for a connection.
struct CountingAcceptor {
    inner: MockAcceptor,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Acceptor for CountingAcceptor {
    async fn accept(&mut self) -> io::Result<Connection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.accept().await
    }
}

#[tokio::test]
async fn accept_limit_stops_calling_accept() {
    let config = config_with(|c| c.listen.keep_open = true);
    let (inner, peers) = mock_acceptor();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut acceptor = CountingAcceptor {
        inner,
        calls: calls.clone(),
    };
    let capture = CaptureWriter::new();
    let hub = hub(config, AccessControl::permissive(), b"");

    let mut peers_in = Vec::new();
    for port in [9101, 9102, 9103] {
        let mut peer = peers.connect(&format!("127.0.0.1:{port}"));
        peer.write_all(format!("p{port};").as_bytes()).await.unwrap();
        peer.shutdown().await.unwrap();
        peers_in.push(peer);
    }

    tokio::time::timeout(
        Duration::from_secs(5),
        hub.accept_forever(SharedOutput::new(capture.clone()), &mut acceptor, Some(2)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let text = capture.text();
    assert!(text.contains("p9101;"));
    assert!(text.contains("p9102;"));
    assert!(!text.contains("p9103;"));
}

#[tokio::test]
async fn stalled_stdin_peer_does_not_block_other_peers() {
    let config = config_with(|c| c.listen.keep_open = true);
    let (mut acceptor, peers) = mock_acceptor();
    let capture = CaptureWriter::new();
    let stdin: BoxedReader = Box::new(std::io::Cursor::new(b"data\n".repeat(200_000)));
    let hub = ListenerHub::new(config, Arc::new(AccessControl::permissive()), Arc::new(NoResolve), stdin);

    // never read from, so the stdin copy to it stalls
    let _first = peers.connect("127.0.0.1:9201");
    let server = tokio::spawn({
        let output = SharedOutput::new(capture.clone());
        async move { hub.accept_forever(output, &mut acceptor, None).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = peers.connect("127.0.0.1:9202");
    second.write_all(b"two").await.unwrap();
    second.shutdown().await.unwrap();

    eventually(|| capture.contents() == b"two").await;
    assert!(read_all(&mut second).await.is_empty());
    server.abort();
}

#[tokio::test]
async fn broker_drops_peer_with_overlong_line() {
    let config = config_with(|c| c.listen.broker = true);
    let (mut acceptor, peers) = mock_acceptor();
    let capture = CaptureWriter::new();
    let hub = hub(config, AccessControl::permissive(), b"");

    let mut flooder = peers.connect("127.0.0.1:9301");
    let writer = tokio::spawn(async move {
        let chunk = vec![b'a'; 8192];
        // stops once the relay closes its end
        while flooder.write_all(&chunk).await.is_ok() {}
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        hub.accept_forever(SharedOutput::new(capture.clone()), &mut acceptor, Some(1)),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(capture.contents().is_empty());
    tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .unwrap()
        .unwrap();
}
