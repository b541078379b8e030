//! Insert-side models. Read-side models ([`StoredMessage`],
//! [`Conversation`]) live in `causerie-shared` because they travel on the
//! wire.
//!
//! [`StoredMessage`]: causerie_shared::StoredMessage
//! [`Conversation`]: causerie_shared::Conversation

use causerie_shared::protocol::MessageKind;
use causerie_shared::UserId;

/// A fully formed message candidate, before the store assigns identity,
/// sequence, and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub encrypted: bool,
}

impl NewMessage {
    pub fn text(sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            recipient_id,
            content: content.into(),
            kind: MessageKind::Text,
            encrypted: true,
        }
    }
}
