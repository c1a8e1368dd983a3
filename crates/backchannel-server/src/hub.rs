//! Connection hub: room membership, presence, and event relay.
//!
//! The hub is the realtime half of the messaging core.  It never touches the
//! message store: a `send-message` event reaches it only after the caller
//! has durably persisted the message, and the relay is a best-effort fast
//! path on top of that (clients deduplicate by message id).
//!
//! All hub state lives behind one mutex, so each inbound event is handled
//! atomically and events relayed within a room preserve the order the hub
//! received them in.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use backchannel_shared::protocol::{ClientEvent, ServerEvent};
use backchannel_shared::types::{ConnectionId, UserId};

use crate::presence::{PresenceRegistry, PresenceTransition};
use crate::rooms::RoomRegistry;

/// A handle to a single connected client.
///
/// The sender feeds the connection's write loop; `user` is bound by the
/// first `join` event on the connection.
struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ServerEvent>,
    user: Option<UserId>,
}

/// Everything the hub mutates, guarded as one unit.
struct HubState {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    rooms: RoomRegistry,
    presence: PresenceRegistry,
}

/// The realtime relay server state.
///
/// Constructed once at server start; the presence registry is injected so
/// tests can drive the hub without a socket in sight.
pub struct ConnectionHub {
    state: Mutex<HubState>,
}

impl ConnectionHub {
    /// Create a hub owning the given presence registry.
    pub fn new(presence: PresenceRegistry) -> Self {
        Self {
            state: Mutex::new(HubState {
                connections: HashMap::new(),
                rooms: RoomRegistry::new(),
                presence,
            }),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the connection id and the receiver feeding the connection's
    /// write loop.  The connection joins no rooms until its `join` event
    /// arrives.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        state
            .connections
            .insert(connection, ConnectionHandle { tx, user: None });

        debug!(connection = %connection, "client connected");

        (connection, rx)
    }

    /// Remove a connection: leave every room, update presence, and broadcast
    /// the offline transition if this was the user's last connection.
    ///
    /// Heartbeat timeouts and explicit close frames both land here.
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.lock();

        let Some(handle) = state.connections.remove(&connection) else {
            return;
        };

        state.rooms.leave_all(connection);

        if let Some(user) = handle.user {
            if let Some(PresenceTransition::Offline) = state.presence.record_leave(&user, connection)
            {
                broadcast_all(
                    &state,
                    &ServerEvent::UserStatus {
                        user_id: user.clone(),
                        online: false,
                    },
                );
            }
            debug!(connection = %connection, user = %user, "client disconnected");
        } else {
            debug!(connection = %connection, "client disconnected before join");
        }
    }

    /// Handle one inbound client event.
    ///
    /// Runs to completion under the hub lock; errors on individual outbound
    /// channels are isolated to their connection.
    pub fn handle_event(&self, connection: ConnectionId, event: ClientEvent) {
        let mut state = self.lock();

        if !state.connections.contains_key(&connection) {
            warn!(connection = %connection, event = event.kind(), "event from unknown connection");
            return;
        }

        match event {
            ClientEvent::Join { user_id } => {
                state.rooms.join(&user_id.to_room(), connection);

                if let Some(handle) = state.connections.get_mut(&connection) {
                    handle.user = Some(user_id.clone());
                }

                if let Some(PresenceTransition::Online) =
                    state.presence.record_join(&user_id, connection)
                {
                    broadcast_all(
                        &state,
                        &ServerEvent::UserStatus {
                            user_id,
                            online: true,
                        },
                    );
                }
            }

            ClientEvent::JoinConversation { conversation_id } => {
                state.rooms.join(&conversation_id.to_room(), connection);
            }

            ClientEvent::LeaveConversation { conversation_id } => {
                state.rooms.leave(&conversation_id.to_room(), connection);
            }

            ClientEvent::SendMessage {
                conversation_id,
                message,
                recipient_id,
            } => {
                if !message.has_body() {
                    warn!(
                        connection = %connection,
                        conversation = %conversation_id,
                        "dropping send-message without content or image"
                    );
                    return;
                }

                // Low-latency path for members with the conversation open.
                relay_to_room(
                    &state,
                    &conversation_id.to_room(),
                    Some(connection),
                    &ServerEvent::NewMessage(message.clone()),
                );

                // Badge path: the recipient may have no conversation room
                // open, but their tabs all sit in the personal room.
                relay_to_room(
                    &state,
                    &recipient_id.to_room(),
                    None,
                    &ServerEvent::MessageNotification {
                        conversation_id,
                        message,
                    },
                );
            }

            ClientEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => {
                relay_to_room(
                    &state,
                    &conversation_id.to_room(),
                    Some(connection),
                    &ServerEvent::UserTyping {
                        user_id,
                        is_typing,
                        conversation_id,
                    },
                );
            }

            ClientEvent::MarkRead {
                conversation_id,
                user_id,
            } => {
                // Durable read state is written out-of-band via the store;
                // the hub only relays the transient signal.
                relay_to_room(
                    &state,
                    &conversation_id.to_room(),
                    Some(connection),
                    &ServerEvent::MessagesRead {
                        user_id,
                        conversation_id,
                    },
                );
            }
        }
    }

    /// Whether the given user currently has a live connection.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.lock().presence.is_online(user)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of currently online users.
    pub fn online_count(&self) -> usize {
        self.lock().presence.online_count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        // Handlers never panic while holding the lock; recover the guard
        // anyway rather than poisoning the whole hub.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Relay helpers
// ---------------------------------------------------------------------------

/// Send an event to every member of a room, optionally excluding one
/// connection (the sender).  A closed receiver only affects its own
/// connection.
fn relay_to_room(
    state: &HubState,
    room: &str,
    except: Option<ConnectionId>,
    event: &ServerEvent,
) {
    for member in state.rooms.members(room) {
        if Some(*member) == except {
            continue;
        }
        if let Some(handle) = state.connections.get(member) {
            if handle.tx.send(event.clone()).is_err() {
                debug!(connection = %member, room = %room, "skipping closed connection");
            }
        }
    }
}

/// Send an event to every registered connection (presence transitions).
fn broadcast_all(state: &HubState, event: &ServerEvent) {
    for (connection, handle) in &state.connections {
        if handle.tx.send(event.clone()).is_err() {
            debug!(connection = %connection, "skipping closed connection");
        }
    }
}
