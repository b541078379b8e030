//! Read operations for conversations.
//!
//! Conversation rows are written only by
//! [`insert_message`](Database::insert_message); they are created lazily on
//! the first message between a pair and never deleted.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use causerie_shared::{Conversation, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Every conversation the identity participates in, most recently
    /// updated first, each annotated with its latest message.
    pub fn conversations_for(&self, identity: &UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participant_a, participant_b, last_message_id, updated_at
             FROM conversations
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY updated_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![identity.as_str()], |row| {
            let id: String = row.get(0)?;
            let a: String = row.get(1)?;
            let b: String = row.get(2)?;
            let last: String = row.get(3)?;
            let updated: String = row.get(4)?;
            Ok((id, a, b, last, updated))
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            let (id, a, b, last, updated) = row?;
            let last_message = self.get_message(parse_uuid(&last)?)?;
            conversations.push(Conversation {
                id: parse_uuid(&id)?,
                participant_a: UserId::new(a),
                participant_b: UserId::new(b),
                last_message,
                updated_at: parse_ts(&updated)?,
            });
        }
        Ok(conversations)
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(s)?)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(s).map_err(StoreError::ChronoParse)?;
    Ok(ts.with_timezone(&Utc))
}
