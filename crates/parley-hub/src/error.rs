//! Hub error types

use parley_core::{ClientId, RoomId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("hub stopped")]
    Stopped,

    #[error("client {client_id} already joined room {room_id}")]
    DuplicateClient { client_id: ClientId, room_id: RoomId },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] parley_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] parley_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
