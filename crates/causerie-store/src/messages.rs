//! CRUD operations for messages.
//!
//! [`insert_message`](Database::insert_message) is the single write path:
//! one transaction covers the message row and the conversation pointer, so
//! a crash can never leave the pointer ahead of (or behind) the message it
//! names.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use causerie_shared::protocol::MessageKind;
use causerie_shared::{PairKey, StoredMessage, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::NewMessage;

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, recipient_id, content, type, encrypted, created_at";

impl Database {
    /// Persist a message, assigning its durable identity, sequence number,
    /// and creation timestamp, and move the pair's conversation pointer.
    ///
    /// Both writes commit atomically.
    pub fn insert_message(&mut self, new: &NewMessage) -> Result<StoredMessage> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let pair = PairKey::new(&new.sender_id, &new.recipient_id);
        let (lo, hi) = pair.participants();

        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO messages (id, sender_id, recipient_id, content, type, encrypted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                new.sender_id.as_str(),
                new.recipient_id.as_str(),
                new.content,
                new.kind.as_str(),
                new.encrypted,
                encode_ts(created_at),
            ],
        )?;
        let seq = tx.last_insert_rowid();

        let moved = tx.execute(
            "UPDATE conversations SET last_message_id = ?1, updated_at = ?2
             WHERE participant_a = ?3 AND participant_b = ?4",
            params![
                id.to_string(),
                encode_ts(created_at),
                lo.as_str(),
                hi.as_str()
            ],
        )?;
        if moved == 0 {
            tx.execute(
                "INSERT INTO conversations (id, participant_a, participant_b, last_message_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    lo.as_str(),
                    hi.as_str(),
                    id.to_string(),
                    encode_ts(created_at),
                ],
            )?;
        }

        tx.commit()?;

        Ok(StoredMessage {
            id,
            seq,
            sender_id: new.sender_id.clone(),
            recipient_id: new.recipient_id.clone(),
            content: new.content.clone(),
            kind: new.kind,
            encrypted: new.encrypted,
            created_at,
        })
    }

    /// Fetch a single message by its store-assigned identity.
    pub fn get_message(&self, id: Uuid) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// One page of the history between two identities, most recent first.
    ///
    /// Ordered by `(created_at, seq)` descending -- a stable total order,
    /// so concurrent inserts cannot reshuffle entries within the boundary
    /// that existed at query time.
    pub fn history_page(
        &self,
        a: &UserId,
        b: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at DESC, seq DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Total number of messages exchanged between two identities.
    pub fn count_between(&self, a: &UserId, b: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)",
            params![a.as_str(), b.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width rendering keeps lexicographic order equal to time order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let seq: i64 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let recipient: String = row.get(3)?;
    let content: String = row.get(4)?;
    let kind_str: String = row.get(5)?;
    let encrypted: bool = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown message type: {kind_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        id,
        seq,
        sender_id: UserId::new(sender),
        recipient_id: UserId::new(recipient),
        content,
        kind,
        encrypted,
        created_at,
    })
}
