//! Integration tests for the tcpserve connection server
//!
//! These tests drive a real server over loopback TCP: line sessions,
//! raw blocks, handler failures, and both shutdown modes.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tcpserve_server::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct State {
    lines: Mutex<Vec<String>>,
    blocks: Mutex<Vec<Bytes>>,
    quits: AtomicUsize,
}

/// PING/QUIT/DATA text protocol recording what it sees
#[derive(Clone, Default)]
struct TextProtocol {
    state: Arc<State>,
}

#[async_trait]
impl LineHandler for TextProtocol {
    async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
        self.state.lines.lock().unwrap().push(line.to_string());

        if line == "PING" {
            let _ = session.send_line(&format!("PONG: {}", line)).await;
        } else if line == "QUIT" {
            let _ = session.send_line("BYE").await;
            session.end();
        } else if let Some(n) = line.strip_prefix("DATA ") {
            return n.parse().unwrap_or(0);
        } else {
            let _ = session.send_line(&format!("ECHO: {}", line)).await;
        }
        0
    }

    async fn on_data(&self, session: &mut LineSession, data: Bytes) {
        let _ = session.send_line(&format!("GOT {}", data.len())).await;
        self.state.blocks.lock().unwrap().push(data);
    }

    async fn on_quit(&self, _session: &mut LineSession) {
        self.state.quits.fetch_add(1, Ordering::SeqCst);
    }
}

type Reports = Arc<Mutex<Vec<String>>>;

fn build<H: Handler>(handler: H) -> (Server, Reports) {
    let reports = Reports::default();
    let sink = reports.clone();
    let server = Server::builder()
        .bind("127.0.0.1:0")
        .error_sink(move |e| sink.lock().unwrap().push(e.to_string()))
        .build_with_handler(handler)
        .unwrap();
    (server, reports)
}

async fn start(server: &Server) -> (SocketAddr, JoinHandle<ServerResult<()>>) {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let server = server.clone();
    (addr, tokio::spawn(async move { server.serve(transport).await }))
}

async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.unwrap())
}

async fn send(client: &mut BufReader<TcpStream>, data: &[u8]) {
    client.get_mut().write_all(data).await.unwrap();
}

async fn recv_line(client: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(WAIT, client.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    line
}

async fn expect_eof(client: &mut BufReader<TcpStream>) {
    let mut rest = Vec::new();
    let read = tokio::time::timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for the server to close");
    // a reset is as good as a close here
    if let Ok(n) = read {
        assert_eq!(n, 0, "unexpected data: {:?}", rest);
    }
}

async fn wait_for_count(server: &Server, n: usize) {
    tokio::time::timeout(WAIT, async {
        while server.connection_count().await != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

/// Reads until the peer disconnects; ignores cancellation
async fn stubborn(mut conn: Connection, _cancel: Signal) -> tcpserve_core::Result<()> {
    let mut buf = [0u8; 64];
    while conn.read(&mut buf).await? > 0 {}
    Ok(())
}

#[tokio::test]
async fn test_line_is_delivered_without_terminator() {
    let protocol = TextProtocol::default();
    let state = protocol.state.clone();
    let (server, _) = build(LineProtocol::new(protocol));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    send(&mut client, b"hello\r\n").await;
    assert_eq!(recv_line(&mut client).await, "ECHO: hello\r\n");
    assert_eq!(*state.lines.lock().unwrap(), vec!["hello"]);

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ping_pong() {
    let (server, _) = build(LineProtocol::new(TextProtocol::default()));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    send(&mut client, b"PING\r\n").await;
    assert_eq!(recv_line(&mut client).await, "PONG: PING\r\n");
    send(&mut client, b"QUIT\n").await;
    assert_eq!(recv_line(&mut client).await, "BYE\r\n");
    expect_eof(&mut client).await;

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_raw_block_is_passed_through() {
    let protocol = TextProtocol::default();
    let state = protocol.state.clone();
    let (server, _) = build(LineProtocol::new(protocol));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    send(&mut client, b"DATA 5\r\n\r\nx\ny").await;
    assert_eq!(recv_line(&mut client).await, "GOT 5\r\n");
    send(&mut client, b"after\r\n").await;
    assert_eq!(recv_line(&mut client).await, "ECHO: after\r\n");

    assert_eq!(
        *state.blocks.lock().unwrap(),
        vec![Bytes::from_static(b"\r\nx\ny")]
    );
    assert_eq!(*state.lines.lock().unwrap(), vec!["DATA 5", "after"]);

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_long_line_ends_only_that_session() {
    let (server, reports) = build(LineProtocol::new(TextProtocol::default()).max_line_size(16));
    let (addr, serving) = start(&server).await;

    let mut victim = connect(addr).await;
    let mut bystander = connect(addr).await;
    wait_for_count(&server, 2).await;

    send(&mut victim, &[b'x'; 64]).await;
    expect_eof(&mut victim).await;

    send(&mut bystander, b"still here\n").await;
    assert_eq!(recv_line(&mut bystander).await, "ECHO: still here\r\n");

    wait_for_count(&server, 1).await;
    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("line too long"), "{}", reports[0]);

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_aborts_connections_and_stops_accepting() {
    let (server, _) = build(from_fn(stubborn));
    let (addr, serving) = start(&server).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }
    wait_for_count(&server, 3).await;

    server.close().await.unwrap();
    for client in &mut clients {
        expect_eof(client).await;
    }
    wait_for_count(&server, 0).await;

    serving.await.unwrap().unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
    assert!(matches!(server.close().await, Err(ServerError::AlreadyClosed)));
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_sessions() {
    let protocol = TextProtocol::default();
    let state = protocol.state.clone();
    let (server, _) = build(LineProtocol::new(protocol));
    let (addr, serving) = start(&server).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }
    wait_for_count(&server, 3).await;

    let shutdown = {
        let server = server.clone();
        tokio::spawn(async move { server.shutdown(Duration::from_secs(5)).await })
    };

    tokio::time::timeout(WAIT, async {
        loop {
            let records = server.connections().await;
            if records.iter().all(|r| r.cancel.is_fired()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sessions were never signalled");

    // sessions notice the cancel after their next line
    for client in &mut clients {
        send(client, b"last words\r\n").await;
        assert_eq!(recv_line(client).await, "ECHO: last words\r\n");
        expect_eof(client).await;
    }

    shutdown.await.unwrap().unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(state.quits.load(Ordering::SeqCst), 3);
    assert_eq!(server.connection_count().await, 0);
    assert_eq!(server.stats().await.total_connections, 3);
}

#[tokio::test]
async fn test_shutdown_deadline_force_closes_stragglers() {
    let (server, _) = build(from_fn(stubborn));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    wait_for_count(&server, 1).await;

    let result = server.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(ServerError::DeadlineExceeded { remaining: 1, .. })
    ));

    expect_eof(&mut client).await;
    wait_for_count(&server, 0).await;
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (server, reports) = build(from_fn(move |mut conn: Connection, _cancel| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                panic!("first connection explodes");
            }
            conn.write_all(b"alive\r\n").await?;
            Ok(())
        }
    }));
    let (addr, serving) = start(&server).await;

    let mut first = connect(addr).await;
    expect_eof(&mut first).await;

    let mut second = connect(addr).await;
    assert_eq!(recv_line(&mut second).await, "alive\r\n");

    wait_for_count(&server, 0).await;
    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("first connection explodes"), "{}", reports[0]);

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_error_is_reported() {
    let (server, reports) = build(from_fn(|_conn: Connection, _cancel| async {
        Err(tcpserve_core::Error::Other("refused".to_string()))
    }));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    expect_eof(&mut client).await;
    wait_for_count(&server, 0).await;
    assert!(reports.lock().unwrap()[0].contains("refused"));

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_user_data_reaches_connections() {
    let server = Server::builder()
        .user_data(String::from("motd"))
        .build_with_handler(from_fn(|mut conn: Connection, _cancel| async move {
            let greeting = conn.user_data::<String>().cloned().unwrap_or_default();
            conn.write_all(format!("{}\r\n", greeting).as_bytes()).await?;
            Ok(())
        }))
        .unwrap();
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    assert_eq!(recv_line(&mut client).await, "motd\r\n");

    server.close().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cooperative_handler_stops_on_cancel() {
    let (server, _) = build(from_fn(|_conn: Connection, cancel: Signal| async move {
        cancel.fired().await;
        Ok(())
    }));
    let (addr, serving) = start(&server).await;

    let mut client = connect(addr).await;
    wait_for_count(&server, 1).await;

    server.shutdown(WAIT).await.unwrap();
    expect_eof(&mut client).await;
    serving.await.unwrap().unwrap();
}
