//! Presence tracking.
//!
//! Maintains an in-memory map from user identity to the set of live
//! connection identifiers and derives edge-triggered online/offline
//! transitions.  A user with three open tabs produces one online event and,
//! only after the last tab closes, one offline event.
//!
//! The registry is plain data: the owning [`ConnectionHub`] serializes all
//! mutations behind its lock, which is what keeps the 0↔1 edge detection
//! race-free.
//!
//! [`ConnectionHub`]: crate::hub::ConnectionHub

use std::collections::{HashMap, HashSet};

use tracing::debug;

use backchannel_shared::types::{ConnectionId, UserId};

/// An online/offline edge produced by a join or leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// The user's connection count went 0 -> 1.
    Online,
    /// The user's connection count went 1 -> 0.
    Offline,
}

/// Tracks which users currently have at least one live connection.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: HashMap<UserId, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    /// Create a new, empty presence registry.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Record a connection joining for `user`.
    ///
    /// Returns [`PresenceTransition::Online`] only when this join took the
    /// user's connection set from empty to non-empty.  Re-joining an already
    /// tracked connection id changes nothing.
    pub fn record_join(
        &mut self,
        user: &UserId,
        connection: ConnectionId,
    ) -> Option<PresenceTransition> {
        let set = self.connections.entry(user.clone()).or_default();
        let was_empty = set.is_empty();
        set.insert(connection);

        if was_empty {
            debug!(user = %user, connection = %connection, "user came online");
            Some(PresenceTransition::Online)
        } else {
            None
        }
    }

    /// Record a connection leaving for `user`.
    ///
    /// Returns [`PresenceTransition::Offline`] only when this leave removed
    /// the user's last connection; the empty entry is dropped.  Leaving with
    /// an unknown connection id changes nothing.
    pub fn record_leave(
        &mut self,
        user: &UserId,
        connection: ConnectionId,
    ) -> Option<PresenceTransition> {
        let Some(set) = self.connections.get_mut(user) else {
            return None;
        };

        if !set.remove(&connection) {
            return None;
        }

        if set.is_empty() {
            self.connections.remove(user);
            debug!(user = %user, connection = %connection, "user went offline");
            Some(PresenceTransition::Offline)
        } else {
            None
        }
    }

    /// Whether the user has at least one live connection.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.connections
            .get(user)
            .is_some_and(|set| !set.is_empty())
    }

    /// Number of live connections for a user.
    pub fn connection_count(&self, user: &UserId) -> usize {
        self.connections.get(user).map_or(0, HashSet::len)
    }

    /// Snapshot of all currently online users.
    pub fn online_users(&self) -> Vec<UserId> {
        self.connections.keys().cloned().collect()
    }

    /// Number of currently online users.
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}
