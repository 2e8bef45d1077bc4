//! Pool tests against a loopback SMTP server.
//!
//! The server greets every connection and answers EHLO with a fixed feature
//! set, which is all the pool needs to prove its connections are usable.

use integrations_smtp_pool::{ConnPool, PoolErrorKind, PooledConn, TcpDialer};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const FEATURE_SET: &str = "250-AUTH PLAIN\r\n250-8BITMIME\r\n250-DSN\r\n250 SMTPUTF8\r\n";
const EHLO_QUIT: &[u8] = b"EHLO test.localhost.localdomain\r\nQUIT\r\n";

/// Starts a minimal SMTP server and returns its address.
async fn spawn_smtp_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(handle_session(socket));
        }
    });

    addr
}

async fn handle_session(socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    if writer.write_all(b"220 localhost ESMTP ready\r\n").await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.to_ascii_uppercase();
        let reply = if command.starts_with("EHLO") {
            format!("250-localhost\r\n{}", FEATURE_SET)
        } else if command.starts_with("QUIT") {
            let _ = writer.write_all(b"221 2.0.0 Bye\r\n").await;
            return;
        } else {
            "250 2.0.0 OK\r\n".to_string()
        };

        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn new_conn_pool(addr: SocketAddr) -> ConnPool<TcpDialer> {
    ConnPool::connect(
        &CancellationToken::new(),
        5,
        30,
        TcpDialer::new(),
        "tcp",
        addr.to_string(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_new_conn_pool() {
    let addr = spawn_smtp_server().await;
    let pool = new_conn_pool(addr).await;

    assert_eq!(pool.size(), 5);
    assert_eq!(pool.network(), "tcp");
    assert_eq!(pool.address(), addr.to_string());

    let mut conn = pool.get().await.unwrap();
    assert_ok!(conn.write_all(EHLO_QUIT).await);

    assert_ok!(pool.close().await);
}

#[tokio::test]
async fn test_get_returns_usable_tcp_connection() {
    let addr = spawn_smtp_server().await;
    let pool = new_conn_pool(addr).await;

    let mut conn: PooledConn<TcpStream> = pool.get().await.unwrap();
    assert_eq!(conn.get_ref().unwrap().peer_addr().unwrap(), addr);

    let mut greeting = [0u8; 4];
    conn.read_exact(&mut greeting).await.unwrap();
    assert_eq!(&greeting, b"220 ");

    assert_ok!(conn.write_all(EHLO_QUIT).await);
    assert_ok!(pool.close().await);
}

#[tokio::test]
async fn test_get_drains_idle_then_dials_on_demand() {
    let addr = spawn_smtp_server().await;
    let pool = new_conn_pool(addr).await;

    let mut first = pool.get().await.unwrap();
    assert_ok!(first.write_all(EHLO_QUIT).await);
    assert_eq!(pool.size(), 4);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut conn = pool.get().await.unwrap();
                conn.write_all(EHLO_QUIT).await.unwrap();
                conn
            })
        })
        .collect();

    // Keep the wrappers alive so nothing is reclaimed before the check.
    let mut held = Vec::new();
    for handle in handles {
        held.push(handle.await.unwrap());
    }
    assert_eq!(pool.size(), 0);

    // Idle is empty but 5 < 30, so this dials instead of failing.
    let mut extra = pool.get().await.unwrap();
    assert_ok!(extra.write_all(EHLO_QUIT).await);

    let status = pool.status();
    assert_eq!(status.total, 6);
    assert_eq!(status.in_use, 6);
    assert_eq!(pool.metrics().idle_hits, 5);

    assert_ok!(pool.close().await);
}

#[tokio::test]
async fn test_reclaimed_connection_is_reused() {
    let addr = spawn_smtp_server().await;
    let pool = ConnPool::connect(
        &CancellationToken::new(),
        1,
        1,
        TcpDialer::new(),
        "tcp",
        addr.to_string(),
    )
    .await
    .unwrap();

    let mut conn = pool.get().await.unwrap();
    let local = conn.get_ref().unwrap().local_addr().unwrap();
    conn.close().await.unwrap();
    assert_eq!(pool.size(), 1);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.get_ref().unwrap().local_addr().unwrap(), local);

    let err = assert_err!(pool.get().await);
    assert_eq!(err.kind(), PoolErrorKind::PoolExhausted);
}

#[tokio::test]
async fn test_construction_fails_when_server_is_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ConnPool::connect(
        &CancellationToken::new(),
        2,
        4,
        TcpDialer::new(),
        "tcp",
        addr.to_string(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), PoolErrorKind::ConstructionDial);
    assert!(err.io_error().is_some());
}
