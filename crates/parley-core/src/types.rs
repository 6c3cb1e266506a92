//! Protocol types and message definitions

use serde::{Deserialize, Deserializer, Serialize};

/// Client identifier
pub type ClientId = String;

/// Room identifier
pub type RoomId = String;

/// Opaque message payload. The relay never looks inside it.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A routed message.
///
/// Field names on the wire are `ClientID`, `To`, `RoomID` and `Data`. An empty
/// `To` means "broadcast to the room"; anything else addresses one member.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Sender, stamped by the session that received the frame
    #[serde(rename = "ClientID", default, deserialize_with = "null_as_default")]
    pub client_id: ClientId,
    /// Destination client (empty for broadcast)
    #[serde(rename = "To", default, deserialize_with = "null_as_default")]
    pub to: ClientId,
    /// Destination room, stamped by the session that received the frame
    #[serde(rename = "RoomID", default, deserialize_with = "null_as_default")]
    pub room_id: RoomId,
    /// Opaque payload
    #[serde(rename = "Data", default, deserialize_with = "null_as_default")]
    pub data: Payload,
}

impl Message {
    /// Create a broadcast message for a room
    pub fn broadcast(client_id: impl Into<ClientId>, room_id: impl Into<RoomId>, data: Payload) -> Self {
        Self {
            client_id: client_id.into(),
            to: ClientId::new(),
            room_id: room_id.into(),
            data,
        }
    }

    /// Create a message addressed to one room member
    pub fn unicast(
        client_id: impl Into<ClientId>,
        room_id: impl Into<RoomId>,
        to: impl Into<ClientId>,
        data: Payload,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            to: to.into(),
            room_id: room_id.into(),
            data,
        }
    }

    /// Overwrite sender and room with the receiving session's own identity.
    ///
    /// Whatever the client put in `ClientID`/`RoomID` is discarded.
    pub fn stamp(&mut self, client_id: &str, room_id: &str) {
        self.client_id.clear();
        self.client_id.push_str(client_id);
        self.room_id.clear();
        self.room_id.push_str(room_id);
    }

    /// True when the message targets every other member of the room
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// Destination of the message
    pub fn destination(&self) -> Destination<'_> {
        if self.is_broadcast() {
            Destination::Room
        } else {
            Destination::Client(&self.to)
        }
    }

    /// First payload key, used for compact log lines
    pub fn data_hint(&self) -> Option<&str> {
        self.data.keys().next().map(String::as_str)
    }
}

/// Where a message is headed inside its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// Every member except the sender
    Room,
    /// The first member with this client id
    Client(&'a str),
}

/// `null` reads the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_overwrites_identity() {
        let mut msg = Message::unicast("spoofed", "other-room", "bob", Payload::new());
        msg.stamp("alice", "r1");
        assert_eq!(msg.client_id, "alice");
        assert_eq!(msg.room_id, "r1");
        assert_eq!(msg.to, "bob");
    }

    #[test]
    fn test_destination() {
        let msg = Message::broadcast("a", "r1", Payload::new());
        assert_eq!(msg.destination(), Destination::Room);

        let msg = Message::unicast("a", "r1", "c", Payload::new());
        assert_eq!(msg.destination(), Destination::Client("c"));
    }

    #[test]
    fn test_data_hint() {
        let mut data = Payload::new();
        data.insert("offer".into(), json!({"sdp": "v=0"}));
        let msg = Message::broadcast("a", "r1", data);
        assert_eq!(msg.data_hint(), Some("offer"));
        assert_eq!(Message::default().data_hint(), None);
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let msg: Message = serde_json::from_value(json!({
            "ClientID": null,
            "To": null,
            "RoomID": null,
            "Data": {"type": "offer"}
        }))
        .unwrap();
        assert_eq!(msg.client_id, "");
        assert_eq!(msg.room_id, "");
        assert!(msg.is_broadcast());
        assert_eq!(msg.data["type"], "offer");
    }
}
