//! Wire protocol for the realtime channel.
//!
//! Frames are JSON objects `{"event": <name>, "data": <payload>}`. The
//! event names and payload field names are the wire contract shared with
//! deployed clients and must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SignalBlob, UserId};

/// Message type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    CallRecord,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::CallRecord => "call-record",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "call-record" => Some(MessageKind::CallRecord),
            _ => None,
        }
    }
}

/// A message candidate as submitted on the realtime channel. The sender is
/// the connection's registered identity, never part of the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub recipient_id: UserId,
    /// Opaque content; ciphertext when `encrypted` is set.
    pub content: String,
    #[serde(rename = "type", default = "MessageDraft::default_kind")]
    pub kind: MessageKind,
    #[serde(default = "MessageDraft::default_encrypted")]
    pub encrypted: bool,
}

impl MessageDraft {
    fn default_kind() -> MessageKind {
        MessageKind::Text
    }

    fn default_encrypted() -> bool {
        true
    }
}

/// A persisted message as returned by the store. `id`, `seq` and
/// `created_at` are store-assigned; `seq` is the tie-break key that keeps
/// history pagination stable under equal timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub seq: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable record of an unordered participant pair plus a pointer to its
/// most recent message. Created lazily, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: UserId,
    pub participant_b: UserId,
    pub last_message: StoredMessage,
    pub updated_at: DateTime<Utc>,
}

/// Terminal resolution of a call attempt, as recorded in `call-record`
/// messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ended,
    Rejected,
    Missed,
}

/// Body of a `call-record` message. Duration is computed server-side from
/// the session's Active-transition stamp; client-side timers are not
/// trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordBody {
    pub status: CallStatus,
    pub duration_secs: u64,
}

/// Why an outgoing call attempt resolved without ringing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnavailableReason {
    /// The callee (or the caller itself) is already in a call.
    Busy,
    /// The callee has no live connection; the attempt is recorded as
    /// missed.
    Offline,
}

/// Non-fatal signaling error codes surfaced to the issuing connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SignalCode {
    NoSuchSession,
}

/// Events a client emits over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Registers the sending connection under an identity.
    Join(UserId),

    /// Submit a message for persist-then-deliver dispatch.
    SendMessage(MessageDraft),

    /// Initiate a call; the offer blob is routed untouched.
    #[serde(rename_all = "camelCase")]
    CallUser {
        callee_identity: UserId,
        offer: SignalBlob,
        caller_identity: UserId,
        caller_display_name: String,
    },

    /// Accept a ringing call addressed to this connection's identity.
    #[serde(rename_all = "camelCase")]
    AnswerCall {
        callee_target: UserId,
        answer: SignalBlob,
    },

    /// Decline a ringing call (issued by the callee), or withdraw one
    /// (issued by the caller).
    RejectCall { target: UserId },

    /// Hang up an active call, or end a still-ringing one.
    EndCall { target: UserId },
}

/// Events the server pushes over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message addressed to this connection's identity.
    ReceiveMessage(StoredMessage),

    /// A call offer; presented until answered, rejected, or withdrawn.
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        offer: SignalBlob,
        caller_identity: UserId,
        caller_display_name: String,
    },

    /// The callee accepted; the answer blob is routed untouched.
    CallAccepted(SignalBlob),

    /// The callee declined, or the caller withdrew while ringing.
    CallRejected,

    /// The other participant ended the call or dropped off.
    CallEnded,

    /// An outgoing call resolved immediately without ringing.
    CallUnavailable { reason: UnavailableReason },

    /// Non-fatal signaling error for an action this connection issued.
    CallError { code: SignalCode },
}
