//! Common test helpers and utilities for Parley tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A relay on an ephemeral port with RAII cleanup
//! - A WebSocket test client speaking the relay's JSON messages
//! - In-memory mock transports for driving sessions without sockets

pub mod mock;

use parley_core::{codec, Message};
use parley_hub::{HubHandle, Server, ServerConfig, ShutdownCoordinator, ShutdownOutcome};
use parley_transport::{
    CloseFrame, Transport, TransportError, TransportEvent, TransportReceiver, TransportSender,
    WebSocketReceiver, WebSocketSender, WebSocketTransport,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until the hub reports exactly `sessions` registered sessions
pub async fn wait_for_sessions(hub: &HubHandle, sessions: usize, max_wait: Duration) -> bool {
    wait_for(
        || async move {
            matches!(hub.stats().await, Ok(stats) if stats.sessions == sessions)
        },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test Relay - RAII wrapper with proper cleanup
// ============================================================================

/// A relay listening on an ephemeral port, stopped on drop
pub struct TestRelay {
    port: u16,
    hub: HubHandle,
    coordinator: Option<ShutdownCoordinator>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRelay {
    /// Start a relay with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(ServerConfig::default()).await
    }

    /// Start a relay with custom configuration
    pub async fn start_with_config(config: ServerConfig) -> Self {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);

        let server = Server::new(config).unwrap();
        let hub = server.hub().clone();
        let coordinator = server.shutdown_coordinator();

        let handle = tokio::spawn(async move {
            let _ = server.serve_websocket(&addr).await;
        });

        // The listener is up once a plain TCP connect succeeds
        let listening = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;
        assert!(listening, "test relay did not start listening");

        Self {
            port,
            hub,
            coordinator: Some(coordinator),
            handle: Some(handle),
        }
    }

    /// Base WebSocket URL, without path
    pub fn base_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Join URL for `username` in `room`
    pub fn url(&self, room: &str, username: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("username", username)
            .append_pair("roomid", room)
            .finish();
        format!("{}/ws?{}", self.base_url(), query)
    }

    /// Join URL for `room` without a username
    pub fn anonymous_url(&self, room: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("roomid", room)
            .finish();
        format!("{}/ws?{}", self.base_url(), query)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Connect a client as `username` in `room`
    pub async fn connect(&self, room: &str, username: &str) -> TestClient {
        TestClient::connect(&self.url(room, username)).await.unwrap()
    }

    /// Connect and wait until the hub has `expected_sessions` members in total
    pub async fn join(&self, room: &str, username: &str, expected_sessions: usize) -> TestClient {
        let client = self.connect(room, username).await;
        assert!(
            wait_for_sessions(&self.hub, expected_sessions, DEFAULT_TIMEOUT).await,
            "{} never registered",
            username
        );
        client
    }

    /// Run the graceful shutdown sequence. Only the first call does anything.
    pub async fn shutdown(&mut self) -> Option<ShutdownOutcome> {
        let coordinator = self.coordinator.take()?;
        Some(coordinator.trigger().await)
    }

    /// Stop the relay explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// A raw WebSocket client for exercising the relay
pub struct TestClient {
    sender: WebSocketSender,
    receiver: WebSocketReceiver,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (sender, receiver) = WebSocketTransport::connect(url).await?;
        Ok(Self { sender, receiver })
    }

    /// Send a message as a JSON text frame
    pub async fn send(&self, message: &Message) {
        let data = codec::encode(message).unwrap();
        self.sender.send(data).await.unwrap();
    }

    /// Send an arbitrary text frame
    pub async fn send_raw(&self, text: &str) {
        self.sender
            .send(bytes::Bytes::copy_from_slice(text.as_bytes()))
            .await
            .unwrap();
    }

    /// Next event other than `Connected`, or `None` on timeout or end of stream
    pub async fn next_event(&mut self, max_wait: Duration) -> Option<TransportEvent> {
        let deadline = Instant::now() + max_wait;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match timeout(left, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Connected)) => continue,
                Ok(event) => return event,
                Err(_) => return None,
            }
        }
    }

    /// Next routed message; panics on anything else
    pub async fn recv_message(&mut self) -> Message {
        match self.next_event(DEFAULT_TIMEOUT).await {
            Some(TransportEvent::Data(data)) => codec::decode(&data).unwrap(),
            other => panic!("expected a message, got {:?}", other),
        }
    }

    /// True if no message arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) -> bool {
        !matches!(self.next_event(window).await, Some(TransportEvent::Data(_)))
    }

    /// Wait for the server's close frame and return its code and reason
    pub async fn expect_close(&mut self) -> Option<CloseFrame> {
        loop {
            match self.next_event(DEFAULT_TIMEOUT).await? {
                TransportEvent::Disconnected {
                    code: Some(code),
                    reason,
                } => return Some(CloseFrame::new(code, reason.unwrap_or_default())),
                TransportEvent::Data(_) => continue,
                _ => return None,
            }
        }
    }

    /// Close from the client side
    pub async fn close(&self) {
        let _ = self.sender.close(Some(CloseFrame::new(1000, "bye"))).await;
    }
}
