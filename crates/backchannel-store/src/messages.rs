//! CRUD operations for [`Message`] records and their read state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use backchannel_shared::protocol::ImageAttachment;
use backchannel_shared::types::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message.
    ///
    /// Runs in one transaction: the message row, the sender's entry in the
    /// read set, and the parent conversation's last-message fields are
    /// written together, so a failure leaves no partial state behind.
    pub fn insert_message(&mut self, message: &Message) -> Result<()> {
        if !message.has_body() {
            return Err(StoreError::EmptyMessage);
        }

        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender, content,
                                   image_url, image_alt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender.as_str(),
                message.content,
                message.image.as_ref().map(|i| i.url.clone()),
                message.image.as_ref().and_then(|i| i.alt.clone()),
                message.created_at.to_rfc3339(),
            ],
        )?;

        // The sender has trivially seen their own message.
        tx.execute(
            "INSERT OR IGNORE INTO message_readers (message_id, user_id) VALUES (?1, ?2)",
            params![message.id.to_string(), message.sender.as_str()],
        )?;

        tx.execute(
            "UPDATE conversations SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3",
            params![
                message.id.to_string(),
                message.created_at.to_rfc3339(),
                message.conversation_id.to_string(),
            ],
        )?;

        tx.commit()?;

        tracing::debug!(
            message = %message.id,
            conversation = %message.conversation_id,
            "message persisted"
        );

        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id, read set included.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, conversation_id, sender, content, image_url, image_alt, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        message.read_by = load_readers(self.conn(), id)?;
        Ok(message)
    }

    /// List every message of a conversation, ordered by creation time
    /// ascending (the initial state transfer of a chat view).
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender, content, image_url, image_alt, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        for message in &mut messages {
            message.read_by = load_readers(self.conn(), message.id)?;
        }

        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record that `user` has seen `message_id`.
    ///
    /// Idempotent: appending an existing reader is a no-op.  Readers are
    /// never removed.  Returns `true` when the reader was newly added.
    pub fn append_reader(&self, message_id: MessageId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_readers (message_id, user_id) VALUES (?1, ?2)",
            params![message_id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Record that `user` has seen every message of a conversation.
    ///
    /// The durable half of the `mark-read` flow; the transient half is the
    /// hub relay.
    pub fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user: &UserId,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_readers (message_id, user_id)
             SELECT id, ?2 FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string(), user.as_str()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`] with an empty read set.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let content: Option<String> = row.get(3)?;
    let image_url: Option<String> = row.get(4)?;
    let image_alt: Option<String> = row.get(5)?;
    let ts_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conversation_id = Uuid::parse_str(&conversation_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        sender: UserId(sender),
        content,
        image: image_url.map(|url| ImageAttachment {
            url,
            alt: image_alt,
        }),
        read_by: Vec::new(),
        created_at,
    })
}

/// Load the read set for a message.
fn load_readers(conn: &Connection, message_id: MessageId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM message_readers WHERE message_id = ?1 ORDER BY user_id ASC",
    )?;

    let rows = stmt.query_map(params![message_id.to_string()], |row| {
        let user: String = row.get(0)?;
        Ok(UserId(user))
    })?;

    let mut readers = Vec::new();
    for row in rows {
        readers.push(row?);
    }
    Ok(readers)
}
