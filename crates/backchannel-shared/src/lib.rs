//! # backchannel-shared
//!
//! Types shared by every Backchannel crate: id newtypes and the realtime
//! wire protocol.

pub mod constants;
pub mod protocol;
pub mod types;

pub use protocol::{ClientEvent, ImageAttachment, ServerEvent, WireMessage};
pub use types::{ConnectionId, ConversationId, MessageId, UserId};
