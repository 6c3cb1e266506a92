//! Parley Core
//!
//! Core types and encoding for the Parley signaling relay.
//!
//! This crate provides:
//! - The routed [`Message`] type and its JSON wire shape
//! - JSON encoding/decoding ([`codec`])
//! - Protocol constants shared by the transport and hub crates

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use types::*;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 8080;

/// Default upgrade path for the WebSocket endpoint
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Query parameter carrying the client identifier
pub const CLIENT_PARAM: &str = "username";

/// Query parameter carrying the room identifier
pub const ROOM_PARAM: &str = "roomid";

/// Close code sent when the server closes a session cleanly ("going away")
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when a connection is refused after the upgrade (policy violation)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close reason sent alongside [`CLOSE_GOING_AWAY`]
pub const SHUTDOWN_REASON: &str = "server shutdown";
