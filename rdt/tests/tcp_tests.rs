//! Integration tests over real loopback TCP.
//!
//! Each test binds a listener on an OS-chosen port, runs the server half in a
//! background task, and drives the client from the test body, mirroring the
//! binary's demonstration exchange.

use std::time::Duration;

use rdt::{
    channel::{Role, TcpChannel},
    connection::{ConnError, Connection, RdtConfig},
    simulator::{FaultConfig, LossyChannel},
    timer::RetryPolicy,
};
use tokio::net::TcpListener;

const POLL: Duration = Duration::from_millis(10);

fn config() -> RdtConfig {
    RdtConfig {
        retry: RetryPolicy {
            initial_timeout: Duration::from_millis(100),
            min_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_millis(400),
            max_retries: 30,
        },
        poll_interval: POLL,
        linger: Duration::from_millis(800),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// Bind a server listener on an OS-chosen loopback port and return it with
/// its port so the client knows where to connect.
async fn bind_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// One message each way, the exchange the binary performs.
#[tokio::test]
async fn client_server_exchange() {
    let (listener, port) = bind_server().await;

    let server = tokio::spawn(async move {
        let chan = TcpChannel::accept(&listener, POLL).await.expect("accept");
        let mut conn = Connection::new(chan, config());
        let msg = conn
            .receive_timeout(Duration::from_secs(10))
            .await
            .expect("server recv");
        conn.send(b"MSG_FROM_SERVER").await.expect("server send");
        conn.linger(Duration::from_millis(300)).await.expect("linger");
        conn.disconnect().await.expect("disconnect");
        msg
    });

    let chan = TcpChannel::connect(Role::Client, "127.0.0.1", port, POLL)
        .await
        .expect("connect");
    let mut conn = Connection::new(chan, config());
    conn.send(b"MSG_FROM_CLIENT").await.expect("client send");
    let reply = conn
        .receive_timeout(Duration::from_secs(10))
        .await
        .expect("client recv");

    assert_eq!(reply, b"MSG_FROM_SERVER");
    assert_eq!(server.await.unwrap(), b"MSG_FROM_CLIENT");
}

/// Corruption on both directions of a TCP stream is repaired by the ARQ loop.
#[tokio::test]
async fn exchange_survives_corruption_over_tcp() {
    const MSG_COUNT: usize = 8;
    let (listener, port) = bind_server().await;
    let faults = |seed| FaultConfig {
        corrupt_rate: 0.3,
        seed: Some(seed),
        ..Default::default()
    };

    let server = tokio::spawn(async move {
        let chan = TcpChannel::accept(&listener, POLL).await.expect("accept");
        let mut conn = Connection::new(LossyChannel::new(chan, faults(101)), config());
        let mut got = Vec::new();
        while got.len() < MSG_COUNT {
            let msg = conn
                .receive_timeout(Duration::from_secs(10))
                .await
                .expect("server recv");
            got.push(msg);
        }
        // Keep re-ACKing until the client hangs up.
        conn.linger(Duration::from_secs(10)).await.expect("linger");
        got
    });

    let chan = TcpChannel::connect(Role::Client, "127.0.0.1", port, POLL)
        .await
        .expect("connect");
    let mut conn = Connection::new(LossyChannel::new(chan, faults(202)), config());
    for i in 0..MSG_COUNT {
        conn.send(format!("tcp-{i}").as_bytes()).await.expect("client send");
    }
    conn.disconnect().await.expect("disconnect");

    let got = server.await.unwrap();
    let expected: Vec<Vec<u8>> = (0..MSG_COUNT).map(|i| format!("tcp-{i}").into_bytes()).collect();
    assert_eq!(got, expected);
}

/// A server that never answers must not hang the client.
#[tokio::test]
async fn unresponsive_server_yields_delivery_failure() {
    let (listener, port) = bind_server().await;

    // Accept and hold the stream open, but never speak the protocol.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let chan = TcpChannel::connect(Role::Client, "127.0.0.1", port, POLL)
        .await
        .expect("connect");
    let mut quick = config();
    quick.retry.max_retries = 2;
    let mut conn = Connection::new(chan, quick);

    let result = conn.send(b"hello?").await;
    assert!(
        matches!(result, Err(ConnError::DeliveryFailure { attempts: 3 })),
        "expected DeliveryFailure, got: {result:?}"
    );
    server.abort();
}
