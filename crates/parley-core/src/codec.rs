//! JSON codec
//!
//! Frames on the wire are single JSON objects:
//!
//! ```text
//! { "ClientID": "...", "To": "...", "RoomID": "...", "Data": { ... } }
//! ```

use crate::{Error, Message, Result};
use bytes::Bytes;

/// Decode one frame into a [`Message`]
pub fn decode(data: &[u8]) -> Result<Message> {
    if data.is_empty() {
        return Err(Error::EmptyFrame);
    }
    serde_json::from_slice(data).map_err(Error::decode)
}

/// Encode a [`Message`] into one frame
pub fn encode(message: &Message) -> Result<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(Error::encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode(b""), Err(Error::EmptyFrame)));
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let msg = Message::unicast("a", "r1", "b", Default::default());
        let bytes = encode(&msg).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"ClientID\":\"a\""));
        assert!(text.contains("\"To\":\"b\""));
        assert!(text.contains("\"RoomID\":\"r1\""));
        assert!(text.contains("\"Data\":{}"));
    }
}
