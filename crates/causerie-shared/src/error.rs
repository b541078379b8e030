use thiserror::Error;

/// Call-signaling failures returned to the connection that issued the
/// action.
///
/// `PeerUnreachable` is deliberately absent: an offline peer is a normal
/// delivery branch, not an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// One of the two parties already participates in a ringing or active
    /// call session.
    #[error("a call involving these parties is already in progress")]
    AlreadyInCall,

    /// No pending session matches the request; usually the other side
    /// resolved it first. The issuing client tolerates this silently.
    #[error("no matching call session")]
    NoSuchSession,
}
