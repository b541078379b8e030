//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `messages` and `conversations`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- `seq` is the store-assigned insertion order; together with
-- `created_at` it forms the stable sort key for history pagination.
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,        -- UUID v4, store-assigned
    sender_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    content      TEXT NOT NULL,               -- opaque; ciphertext when encrypted=1
    type         TEXT NOT NULL,               -- 'text' | 'call-record'
    encrypted    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at   TEXT NOT NULL                -- RFC-3339, store-assigned
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(sender_id, recipient_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_pair_rev
    ON messages(recipient_id, sender_id, created_at);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
-- One row per unordered participant pair; participant_a is the
-- lexicographically smaller identity.
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    participant_a   TEXT NOT NULL,
    participant_b   TEXT NOT NULL,
    last_message_id TEXT NOT NULL,               -- FK -> messages(id)
    updated_at      TEXT NOT NULL,

    UNIQUE (participant_a, participant_b),
    FOREIGN KEY (last_message_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b, updated_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
