//! # causerie-shared
//!
//! Types shared by every Causerie crate: identity and connection newtypes,
//! the JSON wire protocol spoken over the realtime channel, and the
//! signaling error taxonomy.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::SignalError;
pub use protocol::{ClientEvent, Conversation, MessageDraft, ServerEvent, StoredMessage};
pub use types::{ConnectionId, PairKey, SignalBlob, UserId};
