//! Session Tests
//!
//! End-to-end over WebSocket through a running relay:
//! - Stamping of sender and room
//! - Broadcast/unicast between real clients
//! - Malformed input ending one session only
//! - Duplicate and anonymous client ids
//! - Idle sockets that never upgrade
//! - Clean shutdown with close code 1001

use parley_core::{Message, Payload, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION, SHUTDOWN_REASON};
use parley_hub::{HubConfig, ServerConfig, ShutdownOutcome};
use parley_test_utils::{wait_for_sessions, TestClient, TestRelay, DEFAULT_TIMEOUT};
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(200);

fn offer(sdp: &str) -> Payload {
    let mut data = Payload::new();
    data.insert("type".into(), "offer".into());
    data.insert("sdp".into(), sdp.into());
    data
}

// ============================================================================
// Routing Through Sessions
// ============================================================================

#[tokio::test]
async fn test_sender_and_room_are_stamped() {
    let relay = TestRelay::start().await;
    let mut alice = relay.join("r1", "alice", 1).await;
    let mut bob = relay.join("r1", "bob", 2).await;

    // Client-supplied identity is overwritten by the session's own
    let forged = Message {
        client_id: "mallory".into(),
        to: String::new(),
        room_id: "r2".into(),
        data: offer("v=0"),
    };
    alice.send(&forged).await;

    let received = bob.recv_message().await;
    assert_eq!(received.client_id, "alice");
    assert_eq!(received.room_id, "r1");
    assert_eq!(received.data["sdp"], "v=0");
    assert!(alice.expect_silence(QUIET).await);
}

#[tokio::test]
async fn test_unicast_between_clients() {
    let relay = TestRelay::start().await;
    let mut a = relay.join("r1", "a", 1).await;
    let mut b = relay.join("r1", "b", 2).await;
    let mut c = relay.join("r1", "c", 3).await;

    a.send_raw(r#"{"To":"c","Data":{"type":"answer"}}"#).await;

    let received = c.recv_message().await;
    assert_eq!(received.to, "c");
    assert_eq!(received.client_id, "a");
    assert!(b.expect_silence(QUIET).await);
    assert!(a.expect_silence(QUIET).await);
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let relay = TestRelay::start().await;
    let a = relay.join("r1", "a", 1).await;
    let mut b = relay.join("r1", "b", 2).await;
    let mut other = relay.join("r2", "b", 3).await;

    a.send_raw(r#"{"Data":{"n":1}}"#).await;

    assert_eq!(b.recv_message().await.room_id, "r1");
    assert!(other.expect_silence(QUIET).await);
}

#[tokio::test]
async fn test_null_data_is_relayed_as_empty() {
    let relay = TestRelay::start().await;
    let a = relay.join("r1", "a", 1).await;
    let mut b = relay.join("r1", "b", 2).await;

    a.send_raw(r#"{"Data":null}"#).await;

    let received = b.recv_message().await;
    assert!(received.data.is_empty());
}

#[tokio::test]
async fn test_three_peer_scenario() {
    let relay = TestRelay::start().await;
    let mut a = relay.join("r1", "A", 1).await;
    let mut b = relay.join("r1", "B", 2).await;
    let mut c = relay.join("r1", "C", 3).await;

    // A broadcasts: B and C receive, A does not
    a.send(&Message::broadcast("", "", offer("one"))).await;
    assert_eq!(b.recv_message().await.client_id, "A");
    assert_eq!(c.recv_message().await.client_id, "A");

    // A unicasts to C
    a.send(&Message::unicast("", "", "C", offer("two"))).await;
    assert_eq!(c.recv_message().await.data["sdp"], "two");
    assert!(b.expect_silence(QUIET).await);

    // C sends garbage: its session ends and it leaves the room
    c.send_raw("not json").await;
    assert!(wait_for_sessions(relay.hub(), 2, DEFAULT_TIMEOUT).await);
    let closed = c.expect_close().await.expect("C should get a close frame");
    assert_eq!(closed.code, CLOSE_GOING_AWAY);

    // B broadcasts: only A receives
    b.send(&Message::broadcast("", "", offer("three"))).await;
    let received = a.recv_message().await;
    assert_eq!(received.client_id, "B");
    assert_eq!(received.data["sdp"], "three");
    assert!(a.expect_silence(QUIET).await);
}

#[tokio::test]
async fn test_client_disconnect_deregisters() {
    let relay = TestRelay::start().await;
    let _a = relay.join("r1", "a", 1).await;
    let b = relay.join("r1", "b", 2).await;

    b.close().await;
    assert!(wait_for_sessions(relay.hub(), 1, DEFAULT_TIMEOUT).await);

    let stats = relay.hub().stats().await.unwrap();
    assert_eq!(stats.rooms, 1);
}

#[tokio::test]
async fn test_idle_socket_does_not_stall_joins() {
    let relay = TestRelay::start().await;

    // Holds a TCP connection open without ever upgrading it
    let _idle = tokio::net::TcpStream::connect(("127.0.0.1", relay.port()))
        .await
        .unwrap();

    let mut alice = tokio::time::timeout(DEFAULT_TIMEOUT, relay.join("r1", "alice", 1))
        .await
        .expect("join stalled behind an idle socket");
    let bob = relay.join("r1", "bob", 2).await;

    bob.send_raw(r#"{"Data":{"type":"hello"}}"#).await;
    assert_eq!(alice.recv_message().await.client_id, "bob");
}

// ============================================================================
// Join Parameters
// ============================================================================

#[tokio::test]
async fn test_duplicate_username_is_refused_when_unique() {
    let relay = TestRelay::start_with_config(ServerConfig {
        hub: HubConfig {
            unique_client_ids: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    let _first = relay.join("r1", "alice", 1).await;

    let mut second = relay.connect("r1", "alice").await;
    let closed = second.expect_close().await.expect("duplicate should be closed");
    assert_eq!(closed.code, CLOSE_POLICY_VIOLATION);

    assert_eq!(relay.hub().stats().await.unwrap().sessions, 1);
}

#[tokio::test]
async fn test_duplicate_username_allowed_by_default() {
    let relay = TestRelay::start().await;
    let _first = relay.join("r1", "alice", 1).await;
    let _second = relay.join("r1", "alice", 2).await;
}

#[tokio::test]
async fn test_anonymous_client_gets_guest_id() {
    let relay = TestRelay::start().await;
    let anon = TestClient::connect(&relay.anonymous_url("r1")).await.unwrap();
    assert!(wait_for_sessions(relay.hub(), 1, DEFAULT_TIMEOUT).await);
    let mut bob = relay.join("r1", "bob", 2).await;

    anon.send_raw(r#"{"Data":{"type":"hello"}}"#).await;

    let received = bob.recv_message().await;
    assert!(received.client_id.starts_with("guest-"), "{}", received.client_id);
}

#[tokio::test]
async fn test_missing_room_is_refused() {
    let relay = TestRelay::start().await;
    let url = format!("{}/ws?username=alice", relay.base_url());

    assert!(TestClient::connect(&url).await.is_err());
    assert_eq!(relay.hub().stats().await.unwrap().sessions, 0);
}

#[tokio::test]
async fn test_session_limit() {
    let relay = TestRelay::start_with_config(ServerConfig {
        max_sessions: 1,
        ..Default::default()
    })
    .await;
    let _a = relay.join("r1", "a", 1).await;

    let mut b = relay.connect("r1", "b").await;
    let closed = b.expect_close().await.expect("over-limit client should be closed");
    assert_eq!(closed.code, CLOSE_POLICY_VIOLATION);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let mut relay = TestRelay::start().await;
    let mut a = relay.join("r1", "a", 1).await;
    let mut b = relay.join("r2", "b", 2).await;

    let outcome = relay.shutdown().await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained { sessions_closed: 2 });

    for client in [&mut a, &mut b] {
        let closed = client.expect_close().await.expect("close frame");
        assert_eq!(closed.code, CLOSE_GOING_AWAY);
        assert_eq!(closed.reason, SHUTDOWN_REASON);
    }

    // Listener is gone
    assert!(TestClient::connect(&relay.url("r1", "late")).await.is_err());
    assert!(relay.shutdown().await.is_none());
}

#[tokio::test]
async fn test_shutdown_with_no_sessions() {
    let mut relay = TestRelay::start().await;
    let outcome = relay.shutdown().await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained { sessions_closed: 0 });
}
