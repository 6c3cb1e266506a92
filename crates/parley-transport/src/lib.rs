//! Parley Transport Layer
//!
//! This crate provides the connection layer for Parley:
//! - Transport traits shared by every listener/connector
//! - WebSocket (primary, default feature)

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{
    CloseFrame, ConnectInfo, Transport, TransportEvent, TransportReceiver, TransportSender,
    TransportServer,
};

#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
