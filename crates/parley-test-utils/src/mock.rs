//! In-memory transports
//!
//! [`MockSender`] records everything written to it and counts close/abort
//! calls. [`MockServer`] hands connections created through a
//! [`MockConnector`] to the relay's accept loop.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use parley_core::{ClientId, RoomId};
use parley_transport::{
    CloseFrame, ConnectInfo, Result, TransportError, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct SenderState {
    sent: Mutex<Vec<Bytes>>,
    close_frames: Mutex<Vec<Option<CloseFrame>>>,
    closed: AtomicBool,
    aborts: AtomicUsize,
    hang_on_close: bool,
    fail_sends: AtomicBool,
}

/// Recording sender; clones share state
#[derive(Clone, Default)]
pub struct MockSender {
    state: Arc<SenderState>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose `close` never completes, like a peer that stopped reading
    pub fn hanging() -> Self {
        Self {
            state: Arc::new(SenderState {
                hang_on_close: true,
                ..Default::default()
            }),
        }
    }

    /// Make every further `send` fail
    pub fn fail_sends(&self) {
        self.state.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Frames sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.sent.lock().clone()
    }

    /// Close calls that took effect (at most one)
    pub fn close_frames(&self) -> Vec<Option<CloseFrame>> {
        self.state.close_frames.lock().clone()
    }

    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        self.state.sent.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self, frame: Option<CloseFrame>) -> Result<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.close_frames.lock().push(frame);
        if self.state.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn abort(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Receiver fed through an mpsc channel
pub struct MockReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

impl MockReceiver {
    /// The receiver and the sender used to feed it events
    pub fn new() -> (mpsc::Sender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (tx, Self { rx })
    }
}

#[async_trait]
impl TransportReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Client side of a mock connection
pub struct MockConnection {
    /// Everything the relay wrote to this connection
    pub sender: MockSender,
    /// Feeds inbound events to the relay
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl MockConnection {
    /// Deliver one inbound text frame
    pub async fn send_text(&self, text: &str) {
        let data = Bytes::copy_from_slice(text.as_bytes());
        let _ = self.inbound.send(TransportEvent::Data(data)).await;
    }
}

type Pending = (MockSender, MockReceiver, ConnectInfo);

/// Creates connections for a [`MockServer`]
#[derive(Clone)]
pub struct MockConnector {
    tx: mpsc::Sender<Pending>,
}

impl MockConnector {
    pub async fn connect(&self, client_id: Option<&str>, room_id: &str) -> MockConnection {
        self.connect_with(MockSender::new(), client_id, room_id).await
    }

    /// Connect with a prepared sender (e.g. [`MockSender::hanging`])
    pub async fn connect_with(
        &self,
        sender: MockSender,
        client_id: Option<&str>,
        room_id: &str,
    ) -> MockConnection {
        let (inbound, receiver) = MockReceiver::new();
        let info = ConnectInfo {
            addr: local(),
            client_id: client_id.map(ClientId::from),
            room_id: RoomId::from(room_id),
        };
        // The server outlives every connector in tests
        let _ = self.tx.send((sender.clone(), receiver, info)).await;
        MockConnection { sender, inbound }
    }
}

/// Listener whose connections come from a [`MockConnector`]
pub struct MockServer {
    rx: mpsc::Receiver<Pending>,
}

impl MockServer {
    pub fn new() -> (MockConnector, Self) {
        let (tx, rx) = mpsc::channel(16);
        (MockConnector { tx }, Self { rx })
    }
}

#[async_trait]
impl TransportServer for MockServer {
    type Sender = MockSender;
    type Receiver = MockReceiver;

    async fn accept(&mut self) -> Result<(MockSender, MockReceiver, ConnectInfo)> {
        match self.rx.recv().await {
            Some(pending) => Ok(pending),
            // No more connections will come; idle like a quiet listener
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(local())
    }
}

fn local() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}
