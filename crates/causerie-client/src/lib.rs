//! # causerie-client
//!
//! Per-device session controller. Holds the selected conversation, the
//! local message timeline, and a mirror of the call state machine one hop
//! away -- the server owns the authoritative state, this crate only
//! observes transitions through [`ServerEvent`]s and produces the
//! [`ClientEvent`]s a transport shell should emit.
//!
//! [`ServerEvent`]: causerie_shared::ServerEvent
//! [`ClientEvent`]: causerie_shared::ClientEvent

pub mod session;

pub use session::{CallUiState, ClientSession, ReconnectPlan, SessionError};
