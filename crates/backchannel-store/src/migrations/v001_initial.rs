//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `conversations`, `messages`, and
//! `message_readers`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
-- Exactly two participants per conversation, stored as a sorted pair
-- so the unordered (a, b) lookup has a unique row to find.
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_a   TEXT NOT NULL,              -- lower id of the sorted pair
    participant_b   TEXT NOT NULL,              -- higher id of the sorted pair
    last_message_id TEXT,                       -- most recent message, if any
    last_message_at TEXT,                       -- ISO-8601 / RFC-3339
    created_at      TEXT NOT NULL,

    CHECK (participant_a < participant_b)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
    ON conversations(participant_a, participant_b);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender          TEXT NOT NULL,              -- user id
    content         TEXT,                       -- nullable text body
    image_url       TEXT,                       -- nullable single attachment
    image_alt       TEXT,
    created_at      TEXT NOT NULL,              -- ISO-8601

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    CHECK (content IS NOT NULL OR image_url IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at ASC);

-- ----------------------------------------------------------------
-- Message readers
-- ----------------------------------------------------------------
-- Rows are only ever inserted: a user that has seen a message stays in
-- the set.  The sender is inserted together with the message.
CREATE TABLE IF NOT EXISTS message_readers (
    message_id TEXT NOT NULL,                   -- FK -> messages(id)
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
