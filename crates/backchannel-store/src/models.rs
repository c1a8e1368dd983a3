//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backchannel_shared::protocol::{ImageAttachment, WireMessage};
use backchannel_shared::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party chat thread, created lazily on first contact.
///
/// Participants are stored as a sorted pair so that the unordered lookup
/// `(a, b)` and `(b, a)` resolve to the same row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Lower participant id of the sorted pair.
    pub participant_a: UserId,
    /// Higher participant id of the sorted pair.
    pub participant_b: UserId,
    /// Most recent message in the conversation, if any.
    pub last_message_id: Option<MessageId>,
    /// Timestamp of the most recent message, if any.
    pub last_message_at: Option<DateTime<Utc>>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether the given user is one of the two participants.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.participant_a == user || &self.participant_b == user
    }

    /// The participant that is not `user`, if `user` is a participant.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        if &self.participant_a == user {
            Some(&self.participant_b)
        } else if &self.participant_b == user {
            Some(&self.participant_a)
        } else {
            None
        }
    }
}

/// Normalize an unordered participant pair into the sorted storage order.
///
/// Returns an error when both sides are the same user.
pub fn normalize_pair(a: &UserId, b: &UserId) -> Option<(UserId, UserId)> {
    if a == b {
        return None;
    }
    if a < b {
        Some((a.clone(), b.clone()))
    } else {
        Some((b.clone(), a.clone()))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  Immutable after creation except for the growing
/// `read_by` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// User id of the sender.
    pub sender: UserId,
    /// Text body, if any.
    pub content: Option<String>,
    /// Single image attachment, if any.
    pub image: Option<ImageAttachment>,
    /// Users that have seen this message.  Always contains the sender.
    pub read_by: Vec<UserId>,
    /// When the message was sent (as reported by the sender).
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a store message from a wire payload.
    ///
    /// The read set starts with only the sender.
    pub fn from_wire(conversation_id: ConversationId, wire: &WireMessage) -> Self {
        Self {
            id: wire.id,
            conversation_id,
            sender: wire.sender.clone(),
            content: wire.content.clone(),
            image: wire.image.clone(),
            read_by: vec![wire.sender.clone()],
            created_at: wire.timestamp,
        }
    }

    /// Project this message onto the wire shape.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            id: self.id,
            content: self.content.clone(),
            image: self.image.clone(),
            sender: self.sender.clone(),
            timestamp: self.created_at,
        }
    }

    /// Whether the given user has seen this message.
    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }

    /// A message must carry text content or an image, never neither.
    pub fn has_body(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty()) || self.image.is_some()
    }
}
