//! Room membership
//!
//! Owned by the hub's coordination task; nothing else touches it.

use parley_core::{Destination, Message, RoomId};
use std::collections::HashMap;

use crate::session::SessionHandle;

/// Room id → members in join order
#[derive(Debug, Default)]
pub struct Rooms {
    rooms: HashMap<RoomId, Vec<SessionHandle>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session to its room, creating the room on first join
    pub fn join(&mut self, session: SessionHandle) {
        self.rooms
            .entry(session.room_id().to_string())
            .or_default()
            .push(session);
    }

    /// Remove a session by identity. Returns `None` if it is not a member.
    ///
    /// A room left empty is dropped.
    pub fn leave(&mut self, room_id: &str, session_id: &str) -> Option<SessionHandle> {
        let members = self.rooms.get_mut(room_id)?;
        let index = members.iter().position(|s| s.id() == session_id)?;
        let session = members.remove(index);
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        Some(session)
    }

    /// Whether some member of the room already uses this client id
    pub fn has_client(&self, room_id: &str, client_id: &str) -> bool {
        self.members(room_id).iter().any(|s| s.client_id() == client_id)
    }

    pub fn members(&self, room_id: &str) -> &[SessionHandle] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Recipients of a message, in join order.
    ///
    /// Broadcast skips every member whose client id is the sender's; unicast
    /// picks the first member with the destination client id.
    pub fn recipients(&self, message: &Message) -> Vec<&SessionHandle> {
        let members = self.members(&message.room_id);
        match message.destination() {
            Destination::Room => members
                .iter()
                .filter(|s| s.client_id() != message.client_id)
                .collect(),
            Destination::Client(to) => members
                .iter()
                .find(|s| s.client_id() == to)
                .into_iter()
                .collect(),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }

    /// Remove every member of every room
    pub fn drain(&mut self) -> impl Iterator<Item = SessionHandle> + '_ {
        self.rooms.drain().flat_map(|(_, members)| members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Payload;

    fn handle(client: &str, room: &str) -> SessionHandle {
        SessionHandle::new(client, room, 4).0
    }

    fn clients<'a>(recipients: &[&'a SessionHandle]) -> Vec<&'a str> {
        recipients.iter().map(|s| s.client_id()).collect()
    }

    #[test]
    fn test_join_and_leave() {
        let mut rooms = Rooms::new();
        let a = handle("a", "r1");
        let a_id = a.id().clone();
        rooms.join(a);
        rooms.join(handle("b", "r1"));
        rooms.join(handle("c", "r2"));

        assert_eq!(rooms.room_count(), 2);
        assert_eq!(rooms.session_count(), 3);

        assert!(rooms.leave("r1", &a_id).is_some());
        assert!(rooms.leave("r1", &a_id).is_none());
        assert!(rooms.leave("r9", &a_id).is_none());
        assert_eq!(rooms.session_count(), 2);
    }

    #[test]
    fn test_empty_room_is_removed() {
        let mut rooms = Rooms::new();
        let c = handle("c", "r2");
        let c_id = c.id().clone();
        rooms.join(c);

        rooms.leave("r2", &c_id);
        assert_eq!(rooms.room_count(), 0);
        assert!(rooms.members("r2").is_empty());
    }

    #[test]
    fn test_leave_matches_identity_not_client_id() {
        let mut rooms = Rooms::new();
        let first = handle("dup", "r1");
        let second = handle("dup", "r1");
        let second_id = second.id().clone();
        rooms.join(first);
        rooms.join(second);

        let removed = rooms.leave("r1", &second_id).unwrap();
        assert_eq!(removed.id(), &second_id);
        assert_eq!(rooms.members("r1").len(), 1);
        assert_ne!(rooms.members("r1")[0].id(), &second_id);
    }

    #[test]
    fn test_broadcast_recipients() {
        let mut rooms = Rooms::new();
        rooms.join(handle("a", "r1"));
        rooms.join(handle("b", "r1"));
        rooms.join(handle("c", "r1"));
        rooms.join(handle("d", "r2"));

        let msg = Message::broadcast("a", "r1", Payload::new());
        assert_eq!(clients(&rooms.recipients(&msg)), vec!["b", "c"]);
    }

    #[test]
    fn test_unicast_recipients() {
        let mut rooms = Rooms::new();
        rooms.join(handle("a", "r1"));
        rooms.join(handle("b", "r1"));
        rooms.join(handle("c", "r2"));

        let msg = Message::unicast("a", "r1", "b", Payload::new());
        assert_eq!(clients(&rooms.recipients(&msg)), vec!["b"]);

        // Another room's member is never a target
        let msg = Message::unicast("a", "r1", "c", Payload::new());
        assert!(rooms.recipients(&msg).is_empty());

        let msg = Message::unicast("a", "r1", "ghost", Payload::new());
        assert!(rooms.recipients(&msg).is_empty());
    }

    #[test]
    fn test_unicast_picks_first_duplicate() {
        let mut rooms = Rooms::new();
        let first = handle("dup", "r1");
        let first_id = first.id().clone();
        rooms.join(first);
        rooms.join(handle("dup", "r1"));

        let msg = Message::unicast("a", "r1", "dup", Payload::new());
        let recipients = rooms.recipients(&msg);
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].id(), &first_id);
    }

    #[test]
    fn test_drain() {
        let mut rooms = Rooms::new();
        rooms.join(handle("a", "r1"));
        rooms.join(handle("b", "r2"));

        assert_eq!(rooms.drain().count(), 2);
        assert_eq!(rooms.room_count(), 0);
        assert!(!rooms.has_client("r1", "a"));
    }
}
