use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable user identifier issued by the auth collaborator.
///
/// Never interpreted beyond equality and ordering; the server learns it
/// from a validated bearer token or a `join` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One live duplex channel. An identity may hold several at once
/// (multiple devices); a connection belongs to at most one identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical unordered identity pair. `PairKey::new(a, b)` and
/// `PairKey::new(b, a)` are equal, so a pair indexes exactly one call
/// session or conversation regardless of who initiated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    lo: UserId,
    hi: UserId,
}

impl PairKey {
    pub fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self {
                lo: a.clone(),
                hi: b.clone(),
            }
        } else {
            Self {
                lo: b.clone(),
                hi: a.clone(),
            }
        }
    }

    pub fn contains(&self, id: &UserId) -> bool {
        &self.lo == id || &self.hi == id
    }

    /// The other participant, if `id` is one of the pair.
    pub fn peer_of(&self, id: &UserId) -> Option<&UserId> {
        if id == &self.lo {
            Some(&self.hi)
        } else if id == &self.hi {
            Some(&self.lo)
        } else {
            None
        }
    }

    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.lo, &self.hi)
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.lo.short(), self.hi.short())
    }
}

/// Opaque media-negotiation payload (SDP offer/answer blob).
///
/// Routed end-to-end without interpretation; the server never parses or
/// validates the underlying format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SignalBlob(pub serde_json::Value);

impl SignalBlob {
    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }
}
