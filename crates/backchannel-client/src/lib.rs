//! # backchannel-client
//!
//! Per-tab chat session client for Backchannel.
//!
//! The client owns three things: a background WebSocket connection task
//! (commands in, notifications out), the local state machine of the open
//! conversation view, and the durable store handle.  Messages are written
//! to the store first and relayed through the hub second, so the relay can
//! stay best-effort: on reload the store wins.

pub mod client;
pub mod connection;
pub mod session;

mod error;

pub use client::ChatClient;
pub use connection::{spawn_connection, ConnectionCommand, ConnectionNotification};
pub use error::ClientError;
pub use session::{
    ConversationSession, DeliveryState, SessionEntry, SessionPhase, TypingDebounce, TypingSignal,
};
