//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::{ClientId, RoomId, CLOSE_GOING_AWAY, SHUTDOWN_REASON};
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed by the peer (clean or not)
    Disconnected {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// One complete frame received
    Data(Bytes),
    /// Read error; the connection is unusable afterwards
    Error(String),
}

/// Close frame sent when a connection is closed on purpose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 1001 "server shutdown"
    pub fn going_away() -> Self {
        Self::new(CLOSE_GOING_AWAY, SHUTDOWN_REASON)
    }
}

/// Parameters resolved while accepting a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Peer address
    pub addr: SocketAddr,
    /// Requested client identifier, if the client sent one
    pub client_id: Option<ClientId>,
    /// Room to join
    pub room_id: RoomId,
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one frame
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection, optionally with a close frame.
    ///
    /// Only the first call has an effect.
    async fn close(&self, frame: Option<CloseFrame>) -> Result<()>;

    /// Tear the connection down immediately, without a close handshake.
    fn abort(&self);
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event; `None` once the connection is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Client-side connector
#[async_trait]
pub trait Transport: Send + Sync {
    /// The sender type for this transport
    type Sender: TransportSender;
    /// The receiver type for this transport
    type Receiver: TransportReceiver;

    /// Connect to a remote endpoint
    async fn connect(addr: &str) -> Result<(Self::Sender, Self::Receiver)>
    where
        Self: Sized;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept and upgrade a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, ConnectInfo)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}
