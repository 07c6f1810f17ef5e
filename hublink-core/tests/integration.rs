//! Integration tests — handshake, exchanges, steady-state reads and the
//! supervisor, against a scripted hub over a real TCP connection on
//! localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use hublink_core::{
    ConnectionInfo, Health, HealthListener, HealthReason, HubConnection, HubError, HubLineCodec,
    HubSerial, HubTransport, LineHandler, OverrideMode, OverridePlan, Supervisor,
    SupervisorState, SupervisorTiming,
};

// ── Helpers ──────────────────────────────────────────────────────

const SERIAL: &str = "102000012345";

type HubSide = Framed<TcpStream, HubLineCodec>;
type Lines = Arc<Mutex<Vec<String>>>;

/// Spin up a listener on an OS-assigned port and return the connection
/// info pointing at it.
async fn ephemeral_hub() -> (TcpListener, ConnectionInfo) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serial = HubSerial::parse(SERIAL).unwrap();
    let info = ConnectionInfo::with_port(addr.ip().to_string(), addr.port(), serial);
    (listener, info)
}

fn collector() -> (Lines, Arc<dyn LineHandler>) {
    let lines = Lines::default();
    let sink = Arc::clone(&lines);
    let handler: Arc<dyn LineHandler> =
        Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string()));
    (lines, handler)
}

fn client(info: ConnectionInfo, handler: Arc<dyn LineHandler>) -> HubConnection {
    HubConnection::new(info, Duration::from_secs(2), handler)
}

async fn accept(listener: &TcpListener) -> HubSide {
    let (stream, _) = listener.accept().await.unwrap();
    Framed::new(stream, HubLineCodec::new())
}

async fn expect_line(hub: &mut HubSide) -> String {
    tokio::time::timeout(Duration::from_secs(5), hub.next())
        .await
        .expect("timeout")
        .expect("client closed")
        .unwrap()
}

/// Plays the hub side of HELLO / HANDSHAKE / G00 and returns what it read.
async fn greet(hub: &mut HubSide, dump: &[&str]) -> Vec<String> {
    let hello = expect_line(hub).await;
    hub.send("HELLO 1.1 102000012345 20240101120000").await.unwrap();
    let handshake = expect_line(hub).await;
    hub.send("HANDSHAKE").await.unwrap();
    let get_all = expect_line(hub).await;
    for line in dump {
        hub.send(*line).await.unwrap();
    }
    vec![hello, handshake, get_all]
}

/// Reads everything the client sends until it disconnects.
async fn drain(hub: &mut HubSide) -> Vec<String> {
    let mut received = Vec::new();
    while let Some(Ok(line)) = hub.next().await {
        received.push(line);
    }
    received
}

fn lines_of(lines: &Lines) -> Vec<String> {
    lines.lock().unwrap().clone()
}

// ── Handshake ────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_runs_handshake_and_one_refresh() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        let mut received = greet(&mut hub, &["H00 1 Hub", "H01 1 Living 1", "H05"]).await;
        hub.send("S00 1 21.5").await.unwrap();
        received.extend(drain(&mut hub).await);
        received
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    assert!(!conn.is_connected());
    conn.connect().await.unwrap();
    assert!(conn.is_connected());

    // The dump up to and including H05, nothing after it.
    assert_eq!(lines_of(&lines), vec!["H00 1 Hub", "H01 1 Living 1", "H05"]);

    conn.process_one_read(Duration::from_secs(2)).await.unwrap();
    assert_eq!(lines_of(&lines).last().map(String::as_str), Some("S00 1 21.5"));

    conn.disconnect().await.unwrap();
    assert!(!conn.is_connected());

    let received = hub.await.unwrap();
    assert!(received[0].starts_with("HELLO 1.1 102000012345 "));
    assert_eq!(received[0].len(), "HELLO 1.1 102000012345 ".len() + 14);
    assert_eq!(&received[1..], &["HANDSHAKE", "G00"]);
}

#[tokio::test]
async fn test_reject_fails_with_code() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        expect_line(&mut hub).await;
        hub.send("REJECT 1").await.unwrap();
        drain(&mut hub).await
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    match conn.connect().await {
        Err(HubError::Rejected { code, reason }) => {
            assert_eq!(code, 1);
            assert_eq!(reason, "hub serial number mismatch");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(!conn.is_connected());
    assert!(lines_of(&lines).is_empty());
}

#[tokio::test]
async fn test_unexpected_hello_reply_is_violation() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        expect_line(&mut hub).await;
        hub.send("H05").await.unwrap();
        drain(&mut hub).await
    });

    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, HubError::ProtocolViolation(_)), "{err:?}");
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_wrong_handshake_reply_is_violation() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        expect_line(&mut hub).await;
        hub.send("HELLO 1.1").await.unwrap();
        expect_line(&mut hub).await;
        hub.send("REJECT 0").await.unwrap();
        drain(&mut hub).await
    });

    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, HubError::ProtocolViolation(_)), "{err:?}");
}

#[tokio::test]
async fn test_silent_hub_is_violation() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        drain(&mut hub).await
    });

    let (_lines, handler) = collector();
    let mut conn = HubConnection::new(info, Duration::from_millis(200), handler);
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, HubError::ProtocolViolation(_)), "{err:?}");
}

#[tokio::test]
async fn test_refresh_all_connects_when_disconnected() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        let mut received = greet(&mut hub, &["H05"]).await;
        received.extend(drain(&mut hub).await);
        received
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.refresh_all().await.unwrap();
    assert!(conn.is_connected());
    assert_eq!(lines_of(&lines), vec!["H05"]);

    conn.disconnect().await.unwrap();
    // Only the refresh that is part of connect.
    let received = hub.await.unwrap();
    assert_eq!(received.iter().filter(|l| *l == "G00").count(), 1);
}

// ── Exchanges ────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_stops_at_dump_end() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        assert_eq!(expect_line(&mut hub).await, "G00");
        for line in ["H00 1 Hub", "H02 3 Kitchen", "H05", "S00 3 19.0"] {
            hub.send(line).await.unwrap();
        }
        drain(&mut hub).await
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.connect().await.unwrap();
    conn.refresh_all().await.unwrap();
    assert_eq!(
        lines_of(&lines),
        vec!["H05", "H00 1 Hub", "H02 3 Kitchen", "H05"]
    );

    // The line after H05 belongs to the next read.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(conn.has_pending_data());
    conn.process_one_read(Duration::from_secs(1)).await.unwrap();
    assert_eq!(lines_of(&lines).last().map(String::as_str), Some("S00 3 19.0"));
}

#[tokio::test]
async fn test_override_round_trip() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        let add = expect_line(&mut hub).await;
        let fields: Vec<String> = add.split_whitespace().map(str::to_string).collect();
        hub.send("V00 unrelated").await.unwrap();
        hub.send(format!("B03 42 {}", fields[2..].join(" ")))
            .await
            .unwrap();
        let update = expect_line(&mut hub).await;
        (add, update)
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    let created = NaiveDate::from_ymd_opt(2024, 11, 2)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    let mut plan = OverridePlan::constant_for_hub(OverrideMode::Away, created);

    // Connects implicitly.
    let id = conn.set_override(&mut plan).await.unwrap();
    assert_eq!(id, 42);
    assert_eq!(plan.id, Some(42));

    let (add, update) = hub.await.unwrap();
    assert_eq!(add, "A03 -1 3 3 -1 202411020830 0 -1");
    assert_eq!(update, "U03 42 3 3 -1 202411020830 0 -1");
    let sent_id: u32 = update.split_whitespace().nth(1).unwrap().parse().unwrap();
    assert_eq!(sent_id, id);

    let lines = lines_of(&lines);
    assert!(lines.contains(&"V00 unrelated".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("B03 42")));
}

#[tokio::test]
async fn test_override_with_bad_id_is_violation() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        expect_line(&mut hub).await;
        hub.send("B03 x").await.unwrap();
        drain(&mut hub).await
    });

    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.connect().await.unwrap();
    let created = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let mut plan = OverridePlan::constant_for_hub(OverrideMode::Eco, created);
    let err = conn.set_override(&mut plan).await.unwrap_err();
    assert!(matches!(err, HubError::ProtocolViolation(_)), "{err:?}");
    assert_eq!(plan.id, None);
}

// ── Steady-state reads ───────────────────────────────────────────

#[tokio::test]
async fn test_keepalive_echo_is_filtered() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        hub.send("HANDSHAKE").await.unwrap();
        hub.send("S00 2 20.0").await.unwrap();
        expect_line(&mut hub).await
    });

    let (lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.connect().await.unwrap();
    conn.process_one_read(Duration::from_secs(2)).await.unwrap();
    assert_eq!(lines_of(&lines), vec!["H05", "S00 2 20.0"]);

    // Keepalive goes out without waiting for a reply.
    conn.handshake().await.unwrap();
    assert_eq!(hub.await.unwrap(), "HANDSHAKE");
}

#[tokio::test]
async fn test_idle_read_times_out_without_disconnecting() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        drain(&mut hub).await
    });

    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.connect().await.unwrap();
    assert!(!conn.has_pending_data());

    let err = conn
        .process_one_read(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_closed_stream_is_communication_failure() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        // Dropping the hub side closes the socket.
    });

    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    conn.connect().await.unwrap();

    let err = conn
        .process_one_read(Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::ConnectionClosed), "{err:?}");
    assert!(!conn.is_connected());
    assert!(!conn.has_pending_data());
}

#[tokio::test]
async fn test_read_without_socket_is_not_connected() {
    let (_listener, info) = ephemeral_hub().await;
    let (_lines, handler) = collector();
    let mut conn = client(info, handler);
    let err = conn
        .process_one_read(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NotConnected));
    // Disconnecting twice is harmless.
    conn.disconnect().await.unwrap();
    conn.disconnect().await.unwrap();
}

// ── Supervisor over TCP ──────────────────────────────────────────

fn quiet_listener() -> Arc<dyn HealthListener> {
    Arc::new(|_: &Health| {})
}

/// Answers keepalives with an echo and dumps with H05 until the client leaves.
async fn serve(hub: &mut HubSide) -> Vec<String> {
    let mut received = Vec::new();
    while let Some(Ok(line)) = hub.next().await {
        if line == "HANDSHAKE" {
            hub.send("HANDSHAKE").await.unwrap();
        } else if line == "G00" {
            hub.send("H05").await.unwrap();
        }
        received.push(line);
    }
    received
}

#[tokio::test]
async fn test_supervisor_keeps_link_alive() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        serve(&mut hub).await
    });

    let (lines, handler) = collector();
    let timing = SupervisorTiming {
        io_timeout: Duration::from_millis(200),
        full_scan_interval: Duration::from_secs(60),
        retry_backoff: Duration::from_secs(1),
    };
    let handle = Supervisor::spawn(client(info, handler), timing, quiet_listener());

    let mut states = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SupervisorState::Connected),
    )
    .await
    .expect("connected")
    .unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    handle.shutdown().await;

    let received = hub.await.unwrap();
    assert!(received.iter().any(|l| l == "HANDSHAKE"));
    assert!(!received.iter().any(|l| l == "G00"));
    // Echoes of our own keepalives never reach the line handler.
    assert_eq!(lines_of(&lines), vec!["H05"]);
}

#[tokio::test]
async fn test_supervisor_reconnects_after_drop() {
    let (listener, info) = ephemeral_hub().await;
    tokio::spawn(async move {
        {
            let mut first = accept(&listener).await;
            greet(&mut first, &["H05"]).await;
        }
        let mut second = accept(&listener).await;
        greet(&mut second, &["H05"]).await;
        serve(&mut second).await
    });

    let reports = Arc::new(Mutex::new(Vec::<Health>::new()));
    let sink = Arc::clone(&reports);
    let listener: Arc<dyn HealthListener> =
        Arc::new(move |h: &Health| sink.lock().unwrap().push(h.clone()));

    let (_lines, handler) = collector();
    let timing = SupervisorTiming {
        io_timeout: Duration::from_millis(200),
        full_scan_interval: Duration::from_secs(60),
        retry_backoff: Duration::from_millis(300),
    };
    let handle = Supervisor::spawn(client(info, handler), timing, listener);

    tokio::time::timeout(Duration::from_secs(5), async {
        while reports.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("online, offline, online");

    assert_eq!(handle.state(), SupervisorState::Connected);
    handle.shutdown().await;

    let reports = reports.lock().unwrap();
    let healthy: Vec<bool> = reports.iter().map(Health::is_healthy).collect();
    assert_eq!(healthy, vec![true, false, true]);
    assert_eq!(reports[1].reason, HealthReason::CommunicationError);
}

#[tokio::test]
async fn test_supervisor_closes_socket_when_full_scan_stalls() {
    let (listener, info) = ephemeral_hub().await;
    let hub = tokio::spawn(async move {
        let mut hub = accept(&listener).await;
        greet(&mut hub, &["H05"]).await;
        // Echo keepalives but never finish the second dump.
        while let Some(Ok(line)) = hub.next().await {
            if line == "HANDSHAKE" {
                hub.send("HANDSHAKE").await.unwrap();
            } else if line == "G00" {
                hub.send("H00 1 Hub").await.unwrap();
                break;
            }
        }
        drain(&mut hub).await;
        tokio::time::Instant::now()
    });

    let (_lines, handler) = collector();
    let io_timeout = Duration::from_millis(200);
    let timing = SupervisorTiming {
        io_timeout,
        full_scan_interval: Duration::from_millis(300),
        retry_backoff: Duration::from_secs(3),
    };
    let conn = HubConnection::new(info, io_timeout, handler);
    let handle = Supervisor::spawn(conn, timing, quiet_listener());

    let mut states = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SupervisorState::Disconnected),
    )
    .await
    .expect("disconnected")
    .unwrap();
    let disconnected_at = tokio::time::Instant::now();

    // The hub sees the close right away, not after the backoff.
    let closed_at = tokio::time::timeout(Duration::from_secs(1), hub)
        .await
        .expect("socket closed before reconnect")
        .unwrap();
    assert!(closed_at.saturating_duration_since(disconnected_at) < Duration::from_secs(1));
    assert_eq!(handle.state(), SupervisorState::Disconnected);

    handle.shutdown().await;
}
