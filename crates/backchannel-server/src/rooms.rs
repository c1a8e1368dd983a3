//! Room membership bookkeeping.
//!
//! A room is a named group of connections that receive the same broadcast
//! events: one personal room per user plus one room per open conversation.
//! Membership is tracked in both directions so a disconnecting connection
//! can be removed from every room it joined.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use backchannel_shared::types::ConnectionId;

/// Tracks which connections are members of which rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    members: HashMap<String, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomRegistry {
    /// Create a new, empty room registry.
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            joined: HashMap::new(),
        }
    }

    /// Add a connection to a room.  Idempotent; returns `true` when the
    /// connection was newly added.
    pub fn join(&mut self, room: &str, connection: ConnectionId) -> bool {
        let added = self
            .members
            .entry(room.to_string())
            .or_default()
            .insert(connection);

        if added {
            self.joined
                .entry(connection)
                .or_default()
                .insert(room.to_string());
            debug!(room = %room, connection = %connection, "connection joined room");
        }

        added
    }

    /// Remove a connection from a room.  Leaving a room the connection is
    /// not in is a no-op; empty rooms are dropped.
    pub fn leave(&mut self, room: &str, connection: ConnectionId) -> bool {
        let Some(set) = self.members.get_mut(room) else {
            return false;
        };

        let removed = set.remove(&connection);
        if set.is_empty() {
            self.members.remove(room);
        }

        if removed {
            if let Some(rooms) = self.joined.get_mut(&connection) {
                rooms.remove(room);
                if rooms.is_empty() {
                    self.joined.remove(&connection);
                }
            }
            debug!(room = %room, connection = %connection, "connection left room");
        }

        removed
    }

    /// Remove a connection from every room it joined, returning the rooms
    /// it was removed from.  Used on disconnect.
    pub fn leave_all(&mut self, connection: ConnectionId) -> Vec<String> {
        let rooms: Vec<String> = self
            .joined
            .remove(&connection)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            if let Some(set) = self.members.get_mut(room) {
                set.remove(&connection);
                if set.is_empty() {
                    self.members.remove(room);
                }
            }
        }

        rooms
    }

    /// Iterate over the members of a room.
    pub fn members<'a>(&'a self, room: &str) -> impl Iterator<Item = &'a ConnectionId> + 'a {
        self.members.get(room).into_iter().flatten()
    }

    /// Whether a connection is a member of a room.
    pub fn contains(&self, room: &str, connection: ConnectionId) -> bool {
        self.members
            .get(room)
            .is_some_and(|set| set.contains(&connection))
    }

    /// Number of members in a room (0 if the room does not exist).
    pub fn member_count(&self, room: &str) -> usize {
        self.members.get(room).map_or(0, HashSet::len)
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut rooms = RoomRegistry::new();
        let conn = ConnectionId::new();

        assert!(rooms.join("conversation:1", conn));
        // Joining twice has the same observable effect as joining once.
        assert!(!rooms.join("conversation:1", conn));
        assert_eq!(rooms.member_count("conversation:1"), 1);
        assert!(rooms.contains("conversation:1", conn));
    }

    #[test]
    fn test_leave_and_empty_room_cleanup() {
        let mut rooms = RoomRegistry::new();
        let conn = ConnectionId::new();

        rooms.join("conversation:1", conn);
        assert!(rooms.leave("conversation:1", conn));
        assert_eq!(rooms.room_count(), 0);

        // Leaving again is a no-op.
        assert!(!rooms.leave("conversation:1", conn));
    }

    #[test]
    fn test_leave_all_on_disconnect() {
        let mut rooms = RoomRegistry::new();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();

        rooms.join("user:alice", conn);
        rooms.join("conversation:1", conn);
        rooms.join("conversation:1", other);

        let mut left = rooms.leave_all(conn);
        left.sort();
        assert_eq!(left, vec!["conversation:1", "user:alice"]);

        // The other connection is untouched.
        assert!(rooms.contains("conversation:1", other));
        assert_eq!(rooms.member_count("user:alice"), 0);
    }

    #[test]
    fn test_members_iteration() {
        let mut rooms = RoomRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        rooms.join("conversation:1", a);
        rooms.join("conversation:1", b);

        let members: HashSet<ConnectionId> = rooms.members("conversation:1").copied().collect();
        assert_eq!(members, HashSet::from([a, b]));

        // Unknown room iterates as empty.
        assert_eq!(rooms.members("conversation:2").count(), 0);
    }
}
