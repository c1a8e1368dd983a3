//! Local state machine of one open conversation view.
//!
//! The session is plain data driven by explicit inputs (history load, hub
//! events, send outcomes, clock readings), which keeps every transition --
//! including the optimistic-send rollback -- directly testable.
//!
//! Delivery of relayed events is at-least-once: a message can arrive both as
//! the echo of the client's own send and through the room relay, so the
//! entry list deduplicates by message id.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use backchannel_shared::constants::{TYPING_EXPIRY_MS, TYPING_IDLE_MS};
use backchannel_shared::protocol::{ImageAttachment, WireMessage};
use backchannel_shared::types::{ConversationId, MessageId, UserId};
use backchannel_store::Message;

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Entry state
// ---------------------------------------------------------------------------

/// Delivery state of a locally tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically appended; the durable write is still in flight.
    Pending,
    /// The store acknowledged the write (or the message arrived via relay /
    /// history, which implies it was persisted by its sender).
    Confirmed,
    /// The durable write failed.  Entries never rest in this state: the
    /// rollback removes them in the same step.
    Failed,
}

/// One message as the conversation view renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub message: WireMessage,
    pub delivery: DeliveryState,
    /// Whether the other participant has seen this (own) message.  Only
    /// ever flips from `false` to `true` within a session.
    pub seen_by_peer: bool,
}

/// Lifecycle of the conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// History fetch from the store is in flight; relay deltas are not yet
    /// applied.
    Loading,
    /// History is loaded and the conversation room is joined.
    Live,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-view state for one conversation.
#[derive(Debug)]
pub struct ConversationSession {
    conversation_id: ConversationId,
    me: UserId,
    peer: UserId,
    phase: SessionPhase,
    entries: Vec<SessionEntry>,
    peer_typing_until: Option<Instant>,
    typing: TypingDebounce,
}

impl ConversationSession {
    /// Create a session in the `Loading` phase.
    pub fn new(conversation_id: ConversationId, me: UserId, peer: UserId) -> Self {
        Self {
            conversation_id,
            me,
            peer,
            phase: SessionPhase::Loading,
            entries: Vec::new(),
            peer_typing_until: None,
            typing: TypingDebounce::new(Duration::from_millis(TYPING_IDLE_MS)),
        }
    }

    /// Seed the view with the stored history and go live.
    ///
    /// Everything in the store is confirmed by definition; the relay only
    /// carries deltas from this point on.
    pub fn load_history(&mut self, messages: Vec<Message>) {
        self.entries = messages
            .into_iter()
            .map(|message| {
                let seen_by_peer = message.sender == self.me && message.is_read_by(&self.peer);
                SessionEntry {
                    message: message.to_wire(),
                    delivery: DeliveryState::Confirmed,
                    seen_by_peer,
                }
            })
            .collect();
        self.phase = SessionPhase::Live;
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The rendered message list, oldest first.
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Apply a `new-message` delivery.
    ///
    /// Duplicate deliveries (relay + own-send echo) converge on a single
    /// entry, and a duplicate never downgrades a confirmed entry.
    pub fn apply_new_message(&mut self, message: WireMessage) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == message.id) {
            if entry.delivery == DeliveryState::Pending {
                // The relay echo proves the sender's durable write happened.
                entry.delivery = DeliveryState::Confirmed;
            }
            return;
        }

        debug!(message = %message.id, "appending relayed message");
        self.entries.push(SessionEntry {
            message,
            delivery: DeliveryState::Confirmed,
            seen_by_peer: false,
        });
    }

    /// Apply a `user-typing` event from the hub.
    ///
    /// The indicator expires on its own if no stop event follows.
    pub fn apply_typing(&mut self, user: &UserId, is_typing: bool, now: Instant) {
        if user != &self.peer {
            return;
        }
        self.peer_typing_until = if is_typing {
            Some(now + Duration::from_millis(TYPING_EXPIRY_MS))
        } else {
            None
        };
    }

    /// Whether the other participant is typing, as of `now`.
    pub fn peer_is_typing(&self, now: Instant) -> bool {
        self.peer_typing_until.is_some_and(|until| now < until)
    }

    /// Apply a `messages-read` event: the peer has seen everything we sent.
    ///
    /// Seen state never reverses within a session.
    pub fn apply_messages_read(&mut self, user: &UserId) {
        if user != &self.peer {
            return;
        }
        for entry in &mut self.entries {
            if entry.message.sender == self.me {
                entry.seen_by_peer = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound sends
    // ------------------------------------------------------------------

    /// Optimistically append an outgoing message before the durable write.
    ///
    /// Returns the wire payload to persist and broadcast.  The entry stays
    /// `Pending` until [`confirm_send`] or [`fail_send`] resolves it.
    ///
    /// [`confirm_send`]: Self::confirm_send
    /// [`fail_send`]: Self::fail_send
    pub fn begin_send(
        &mut self,
        content: Option<String>,
        image: Option<ImageAttachment>,
    ) -> Result<WireMessage, ClientError> {
        let message = WireMessage {
            id: MessageId::new(),
            content,
            image,
            sender: self.me.clone(),
            timestamp: Utc::now(),
        };

        if !message.has_body() {
            return Err(ClientError::EmptyMessage);
        }

        self.entries.push(SessionEntry {
            message: message.clone(),
            delivery: DeliveryState::Pending,
            seen_by_peer: false,
        });

        Ok(message)
    }

    /// The durable write succeeded: the entry is confirmed in place.
    pub fn confirm_send(&mut self, id: MessageId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == id) {
            entry.delivery = DeliveryState::Confirmed;
        }
    }

    /// The durable write failed: roll the optimistic entry back.
    ///
    /// Returns the removed message so callers can surface what was lost.
    pub fn fail_send(&mut self, id: MessageId) -> Option<WireMessage> {
        let index = self.entries.iter().position(|e| e.message.id == id)?;
        let mut entry = self.entries.remove(index);
        entry.delivery = DeliveryState::Failed;
        debug!(message = %id, "rolled back failed send");
        Some(entry.message)
    }

    // ------------------------------------------------------------------
    // Typing emission
    // ------------------------------------------------------------------

    /// Record a keystroke; returns a signal when the hub should hear about
    /// it (at most one start per burst).
    pub fn on_keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        self.typing.on_keystroke(now)
    }

    /// Periodic check; returns `Stopped` once the keystroke burst went idle.
    pub fn on_typing_tick(&mut self, now: Instant) -> Option<TypingSignal> {
        self.typing.on_tick(now)
    }

    /// Sending a message ends the typing burst immediately.
    pub fn on_send_typing_stop(&mut self) -> Option<TypingSignal> {
        self.typing.on_send()
    }
}

// ---------------------------------------------------------------------------
// Typing debounce
// ---------------------------------------------------------------------------

/// Signals the debounce asks the caller to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Started,
    Stopped,
}

/// Debounces keystrokes into at most one started/stopped pair per burst.
///
/// Driven entirely by caller-supplied [`Instant`]s so tests never sleep.
#[derive(Debug)]
pub struct TypingDebounce {
    idle: Duration,
    last_keystroke: Option<Instant>,
}

impl TypingDebounce {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            last_keystroke: None,
        }
    }

    /// Whether a typing burst is currently active.
    pub fn is_active(&self) -> bool {
        self.last_keystroke.is_some()
    }

    /// Record a keystroke at `now`.
    pub fn on_keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let started = self.last_keystroke.is_none();
        self.last_keystroke = Some(now);
        started.then_some(TypingSignal::Started)
    }

    /// Check for idle expiry at `now`.
    pub fn on_tick(&mut self, now: Instant) -> Option<TypingSignal> {
        let last = self.last_keystroke?;
        if now.duration_since(last) >= self.idle {
            self.last_keystroke = None;
            Some(TypingSignal::Stopped)
        } else {
            None
        }
    }

    /// End the burst immediately (message sent).
    pub fn on_send(&mut self) -> Option<TypingSignal> {
        self.last_keystroke
            .take()
            .map(|_| TypingSignal::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        ConversationSession::new(
            ConversationId::new(),
            UserId::from("me"),
            UserId::from("peer"),
        )
    }

    fn wire(sender: &str, body: &str) -> WireMessage {
        WireMessage {
            id: MessageId::new(),
            content: Some(body.to_string()),
            image: None,
            sender: UserId::from(sender),
            timestamp: Utc::now(),
        }
    }

    fn stored(session: &ConversationSession, sender: &str, body: &str) -> Message {
        Message::from_wire(session.conversation_id(), &wire(sender, body))
    }

    #[test]
    fn test_load_history_goes_live() {
        let mut session = session();
        assert_eq!(session.phase(), SessionPhase::Loading);

        let mut own = stored(&session, "me", "hello");
        own.read_by.push(UserId::from("peer"));
        let theirs = stored(&session, "peer", "hi");

        session.load_history(vec![own, theirs]);

        assert_eq!(session.phase(), SessionPhase::Live);
        assert_eq!(session.entries().len(), 2);
        assert!(session
            .entries()
            .iter()
            .all(|e| e.delivery == DeliveryState::Confirmed));
        // The peer had already read our first message.
        assert!(session.entries()[0].seen_by_peer);
        assert!(!session.entries()[1].seen_by_peer);
    }

    #[test]
    fn test_duplicate_delivery_renders_once() {
        let mut session = session();
        session.load_history(Vec::new());

        let message = wire("peer", "did you see the deck?");
        session.apply_new_message(message.clone());
        session.apply_new_message(message.clone());

        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].message, message);
    }

    #[test]
    fn test_own_echo_converges_with_pending_entry() {
        let mut session = session();
        session.load_history(Vec::new());

        let message = session.begin_send(Some("sent from here".into()), None).unwrap();
        assert_eq!(session.entries()[0].delivery, DeliveryState::Pending);

        // The relay echoes our own message back (e.g. another tab's room).
        session.apply_new_message(message);

        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_relay_echo_never_downgrades_confirmed() {
        let mut session = session();
        session.load_history(Vec::new());

        let message = session.begin_send(Some("hi".into()), None).unwrap();
        session.confirm_send(message.id);
        session.apply_new_message(message);

        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_failed_send_rolls_back() {
        let mut session = session();
        session.load_history(Vec::new());

        let kept = session.begin_send(Some("kept".into()), None).unwrap();
        session.confirm_send(kept.id);

        let lost = session.begin_send(Some("lost".into()), None).unwrap();
        let removed = session.fail_send(lost.id).unwrap();

        assert_eq!(removed.id, lost.id);
        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].message.id, kept.id);
    }

    #[test]
    fn test_begin_send_requires_body() {
        let mut session = session();
        session.load_history(Vec::new());

        assert!(matches!(
            session.begin_send(None, None),
            Err(ClientError::EmptyMessage)
        ));
        assert!(session.entries().is_empty());

        // An image alone is a valid body.
        let message = session
            .begin_send(
                None,
                Some(ImageAttachment {
                    url: "https://cdn.example/shot.png".into(),
                    alt: None,
                }),
            )
            .unwrap();
        assert!(message.image.is_some());
    }

    #[test]
    fn test_messages_read_is_monotonic_and_scoped_to_peer() {
        let mut session = session();
        session.load_history(Vec::new());

        let own = session.begin_send(Some("ours".into()), None).unwrap();
        session.confirm_send(own.id);
        session.apply_new_message(wire("peer", "theirs"));

        // A read event from someone else does nothing.
        session.apply_messages_read(&UserId::from("stranger"));
        assert!(!session.entries()[0].seen_by_peer);

        session.apply_messages_read(&UserId::from("peer"));
        assert!(session.entries()[0].seen_by_peer);
        // The peer's own message is untouched.
        assert!(!session.entries()[1].seen_by_peer);

        // Seen state never reverses.
        session.apply_messages_read(&UserId::from("peer"));
        assert!(session.entries()[0].seen_by_peer);
    }

    #[test]
    fn test_peer_typing_expires_without_stop_event() {
        let mut session = session();
        session.load_history(Vec::new());
        let now = Instant::now();

        session.apply_typing(&UserId::from("peer"), true, now);
        assert!(session.peer_is_typing(now));
        assert!(session.peer_is_typing(now + Duration::from_millis(TYPING_EXPIRY_MS - 1)));
        // No stop event ever arrives; the flag clears on its own.
        assert!(!session.peer_is_typing(now + Duration::from_millis(TYPING_EXPIRY_MS)));

        // An explicit stop clears immediately.
        session.apply_typing(&UserId::from("peer"), true, now);
        session.apply_typing(&UserId::from("peer"), false, now);
        assert!(!session.peer_is_typing(now));

        // Typing from a non-participant is ignored.
        session.apply_typing(&UserId::from("stranger"), true, now);
        assert!(!session.peer_is_typing(now));
    }

    #[test]
    fn test_typing_debounce_one_start_per_burst() {
        let mut debounce = TypingDebounce::new(Duration::from_millis(TYPING_IDLE_MS));
        let start = Instant::now();

        assert_eq!(debounce.on_keystroke(start), Some(TypingSignal::Started));
        assert_eq!(debounce.on_keystroke(start + Duration::from_millis(100)), None);
        assert_eq!(debounce.on_keystroke(start + Duration::from_millis(200)), None);

        // Not idle yet.
        assert_eq!(debounce.on_tick(start + Duration::from_millis(300)), None);

        // Idle window elapsed since the *last* keystroke.
        assert_eq!(
            debounce.on_tick(start + Duration::from_millis(200 + TYPING_IDLE_MS)),
            Some(TypingSignal::Stopped)
        );
        assert!(!debounce.is_active());

        // A new burst starts again.
        assert_eq!(
            debounce.on_keystroke(start + Duration::from_secs(10)),
            Some(TypingSignal::Started)
        );
    }

    #[test]
    fn test_typing_debounce_send_stops_immediately() {
        let mut debounce = TypingDebounce::new(Duration::from_millis(TYPING_IDLE_MS));
        let now = Instant::now();

        assert!(debounce.on_send().is_none());

        debounce.on_keystroke(now);
        assert_eq!(debounce.on_send(), Some(TypingSignal::Stopped));
        assert_eq!(debounce.on_tick(now + Duration::from_secs(60)), None);
    }
}
