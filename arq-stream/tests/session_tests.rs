//! Integration tests for the async session driver.
//!
//! Each test runs two sessions on loopback UDP sockets.  Ticks are shortened
//! to a couple of milliseconds so retransmission paths finish quickly.

use std::net::SocketAddr;
use std::time::Duration;

use arq_stream::session::{Session, SessionError};
use arq_stream::simulator::{Simulator, SimulatorConfig};
use arq_stream::socket::Socket;
use arq_stream::{ConnectionParameters, ConnectionState, EngineConfig, EngineError, Event, Role};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LIMIT: Duration = Duration::from_secs(10);

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn fast() -> EngineConfig {
    EngineConfig {
        timeout_unit: Duration::from_millis(2),
        ..Default::default()
    }
}

fn params(isn: u16) -> ConnectionParameters {
    ConnectionParameters {
        initial_sequence_number: arq_stream::SequenceNumber(isn),
        ..Default::default()
    }
}

/// Start a listening session and a connecting session and wait until both
/// report `Opened`.
async fn open_pair(client_link: Option<Simulator>) -> (Session, Session) {
    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;
    let mut server = Session::listen(server_sock, params(7000), fast()).expect("listen");
    let mut client = Session::spawn(
        ephemeral().await,
        Role::Initiator,
        Some(server_addr),
        params(100),
        fast(),
        client_link,
    )
    .expect("connect");

    tokio::time::timeout(LIMIT, client.wait_open())
        .await
        .expect("client open timed out")
        .expect("client open failed");
    tokio::time::timeout(LIMIT, server.wait_open())
        .await
        .expect("server open timed out")
        .expect("server open failed");
    (client, server)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_streams_payloads_in_order() {
    let (mut client, mut server) = open_pair(None).await;

    let status = client.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Open);
    assert_eq!(status.role, Some(Role::Initiator));

    let sent: Vec<Vec<u8>> = (0..40).map(|i| format!("line {i}").into_bytes()).collect();
    for payload in &sent {
        client.send(payload.clone()).await.expect("send");
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        let payload = tokio::time::timeout(LIMIT, server.recv())
            .await
            .expect("recv timed out")
            .expect("recv failed");
        received.push(payload);
    }
    assert_eq!(received, sent);

    client.close(true).await.unwrap();
    let end = tokio::time::timeout(LIMIT, server.recv())
        .await
        .expect("close timed out");
    assert!(matches!(end, Err(SessionError::Closed)));

    // The client sees its own close complete.
    loop {
        match tokio::time::timeout(LIMIT, client.next_event()).await {
            Ok(Some(Event::Closed)) => break,
            Ok(Some(_)) => continue,
            other => panic!("unexpected end of client events: {other:?}"),
        }
    }
}

#[tokio::test]
async fn session_recovers_from_lossy_link() {
    let link = Simulator::new(
        SimulatorConfig {
            loss_rate: 0.2,
            duplicate_rate: 0.05,
            ..Default::default()
        },
        42,
    )
    .unwrap();
    let (client, mut server) = open_pair(Some(link)).await;

    let sent: Vec<Vec<u8>> = (0..30u8).map(|i| vec![i; 64]).collect();
    let producer = {
        let sent = sent.clone();
        tokio::spawn(async move {
            for payload in sent {
                client.send(payload).await.expect("send");
            }
            client
        })
    };

    let mut received = Vec::new();
    while received.len() < sent.len() {
        let payload = tokio::time::timeout(LIMIT, server.recv())
            .await
            .expect("recv timed out")
            .expect("recv failed");
        received.push(payload);
    }
    assert_eq!(received, sent);

    let client = producer.await.unwrap();
    assert!(client.status().await.unwrap().counters.resent > 0);
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_peer() {
    let (client, mut server) = open_pair(None).await;
    tokio::time::timeout(LIMIT, client.shutdown())
        .await
        .expect("shutdown timed out");

    let end = tokio::time::timeout(LIMIT, server.recv())
        .await
        .expect("peer close timed out");
    assert!(matches!(end, Err(SessionError::Closed)));
}

#[tokio::test]
async fn connect_to_silent_peer_times_out() {
    // Bound but never read, so nothing ever answers.
    let silent = ephemeral().await;
    let config = EngineConfig {
        handshake_retries: 2,
        ..fast()
    };
    let mut client =
        Session::connect(ephemeral().await, silent.local_addr, params(1), config).expect("connect");

    let outcome = tokio::time::timeout(LIMIT, client.wait_open())
        .await
        .expect("open did not settle");
    assert!(matches!(
        outcome,
        Err(SessionError::Engine(EngineError::HandshakeTimeout))
    ));
    drop(silent);
}
