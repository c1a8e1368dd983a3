use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

/// A single image attachment on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// Message payload as it travels over the wire.
///
/// Read state is not part of the wire shape; it lives in the store and is
/// relayed separately via `messages-read`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
}

impl WireMessage {
    /// A message must carry text content or an image, never neither.
    pub fn has_body(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty()) || self.image.is_some()
    }
}

/// All events clients send to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Authenticated identity announces itself and joins its personal room.
    #[serde(rename_all = "camelCase")]
    Join { user_id: UserId },

    /// Join the room of an open conversation (idempotent).
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: ConversationId },

    /// Leave a conversation room (the personal room stays joined).
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: ConversationId },

    /// Ask the hub to relay an already-persisted message.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: ConversationId,
        message: WireMessage,
        recipient_id: UserId,
    },

    /// Transient typing indicator; never persisted.
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    /// The user has seen the conversation; durable read state is written
    /// out-of-band through the store.
    #[serde(rename_all = "camelCase")]
    MarkRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },
}

/// All events the hub relays to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A message for a conversation room the client has open.
    NewMessage(WireMessage),

    /// A message for the recipient's personal room (chat-list badge path,
    /// covers conversations with no open room).
    #[serde(rename_all = "camelCase")]
    MessageNotification {
        conversation_id: ConversationId,
        message: WireMessage,
    },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: UserId,
        is_typing: bool,
        conversation_id: ConversationId,
    },

    #[serde(rename_all = "camelCase")]
    MessagesRead {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    #[serde(rename_all = "camelCase")]
    UserStatus { user_id: UserId, online: bool },
}

impl ClientEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::JoinConversation { .. } => "join-conversation",
            ClientEvent::LeaveConversation { .. } => "leave-conversation",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::MarkRead { .. } => "mark-read",
        }
    }
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageNotification { .. } => "message-notification",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::UserStatus { .. } => "user-status",
        }
    }
}
