//! Call-session state machine.
//!
//! One session per unordered identity pair, `Ringing -> Active` with
//! terminal exits `Rejected`, `Missed`, and `Ended`; every terminal state
//! discards the session. Offer/answer blobs are routed untouched -- this
//! manager never inspects the media-negotiation payload.
//!
//! The session table and a per-identity busy index live behind one async
//! mutex, which makes `initiate`'s check-then-create atomic: concurrent
//! attempts for the same pair resolve to exactly one ringing session.
//! Signaling traffic is orders of magnitude rarer than message fan-out,
//! so the single lock is not a contention point (the registry, where
//! fan-out lives, is the sharded structure).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use causerie_shared::protocol::CallStatus;
use causerie_shared::{PairKey, ServerEvent, SignalBlob, SignalError, UserId};

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Ringing,
    Active,
}

#[derive(Debug, Clone)]
struct CallSession {
    caller: UserId,
    callee: UserId,
    state: CallState,
    /// Stamped on the `Ringing -> Active` transition; the server-side
    /// source of truth for call duration.
    connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CallTable {
    sessions: HashMap<PairKey, CallSession>,
    /// Which session, if any, each identity currently participates in.
    /// An identity is in at most one ringing/active session at a time.
    busy: HashMap<UserId, PairKey>,
}

impl CallTable {
    fn remove(&mut self, pair: &PairKey) -> Option<CallSession> {
        let session = self.sessions.remove(pair)?;
        self.busy.remove(&session.caller);
        self.busy.remove(&session.callee);
        Some(session)
    }
}

/// How an `initiate` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// Offer forwarded; a session is now ringing.
    Ringing,
    /// The callee had no live connection; no session was created and the
    /// attempt is already resolved.
    Missed,
}

/// Terminal record of a call attempt, used to persist `call-record`
/// messages. Duration is computed from the Active-transition stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub caller: UserId,
    pub callee: UserId,
    pub status: CallStatus,
    pub duration_secs: u64,
}

impl CallOutcome {
    fn new(session: &CallSession, status: CallStatus) -> Self {
        let duration_secs = match (status, session.connected_at) {
            (CallStatus::Ended, Some(connected_at)) => {
                (Utc::now() - connected_at).num_seconds().max(0) as u64
            }
            _ => 0,
        };
        Self {
            caller: session.caller.clone(),
            callee: session.callee.clone(),
            status,
            duration_secs,
        }
    }
}

pub struct CallSessionManager {
    registry: Arc<ConnectionRegistry>,
    table: Mutex<CallTable>,
}

impl CallSessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            table: Mutex::new(CallTable::default()),
        }
    }

    /// Start a call attempt. Fails with [`SignalError::AlreadyInCall`]
    /// when either party already participates in a ringing or active
    /// session. An offline callee resolves immediately as
    /// [`InitiateOutcome::Missed`] -- no ringing period.
    pub async fn initiate(
        &self,
        caller: &UserId,
        callee: &UserId,
        caller_display_name: &str,
        offer: SignalBlob,
    ) -> Result<InitiateOutcome, SignalError> {
        if caller == callee {
            return Err(SignalError::AlreadyInCall);
        }

        let mut table = self.table.lock().await;

        if table.busy.contains_key(caller) || table.busy.contains_key(callee) {
            debug!(caller = %caller.short(), callee = %callee.short(), "initiate refused: busy");
            return Err(SignalError::AlreadyInCall);
        }

        let delivered = self
            .registry
            .send(
                callee,
                &ServerEvent::IncomingCall {
                    offer,
                    caller_identity: caller.clone(),
                    caller_display_name: caller_display_name.to_string(),
                },
            )
            .await;

        if !delivered {
            info!(caller = %caller.short(), callee = %callee.short(), "callee offline, call missed");
            return Ok(InitiateOutcome::Missed);
        }

        let pair = PairKey::new(caller, callee);
        table.sessions.insert(
            pair.clone(),
            CallSession {
                caller: caller.clone(),
                callee: callee.clone(),
                state: CallState::Ringing,
                connected_at: None,
            },
        );
        table.busy.insert(caller.clone(), pair.clone());
        table.busy.insert(callee.clone(), pair);

        info!(caller = %caller.short(), callee = %callee.short(), "call ringing");
        Ok(InitiateOutcome::Ringing)
    }

    /// Accept a ringing call addressed to `callee`, forwarding the answer
    /// to the caller. [`SignalError::NoSuchSession`] when nothing is
    /// pending (e.g. the caller already withdrew); the issuing side
    /// tolerates that silently.
    pub async fn accept(
        &self,
        callee: &UserId,
        target: &UserId,
        answer: SignalBlob,
    ) -> Result<(), SignalError> {
        let mut table = self.table.lock().await;
        let pair = PairKey::new(callee, target);

        let session = table
            .sessions
            .get_mut(&pair)
            .filter(|s| s.state == CallState::Ringing && &s.callee == callee)
            .ok_or(SignalError::NoSuchSession)?;

        session.state = CallState::Active;
        session.connected_at = Some(Utc::now());
        let caller = session.caller.clone();

        let delivered = self
            .registry
            .send(&caller, &ServerEvent::CallAccepted(answer))
            .await;

        if !delivered {
            // Caller vanished between ringing and answer; resolve the
            // session and dismiss the callee's call state.
            table.remove(&pair);
            self.registry.send(callee, &ServerEvent::CallEnded).await;
            debug!(caller = %caller.short(), callee = %callee.short(), "caller gone at accept");
            return Ok(());
        }

        info!(caller = %caller.short(), callee = %callee.short(), "call active");
        Ok(())
    }

    /// Decline or withdraw a still-ringing call.
    ///
    /// Issued by the callee it is a rejection; issued by the caller it is
    /// a withdrawal and resolves as `Missed`. Either way the other party
    /// receives `callRejected` and the session is discarded.
    pub async fn reject(
        &self,
        issuer: &UserId,
        target: &UserId,
    ) -> Result<CallOutcome, SignalError> {
        let mut table = self.table.lock().await;
        let pair = PairKey::new(issuer, target);

        let ringing = table
            .sessions
            .get(&pair)
            .map(|s| s.state == CallState::Ringing)
            .unwrap_or(false);
        if !ringing {
            return Err(SignalError::NoSuchSession);
        }

        let session = table.remove(&pair).ok_or(SignalError::NoSuchSession)?;
        let status = if issuer == &session.callee {
            CallStatus::Rejected
        } else {
            CallStatus::Missed
        };
        let outcome = CallOutcome::new(&session, status);

        self.registry.send(target, &ServerEvent::CallRejected).await;

        info!(
            caller = %session.caller.short(),
            callee = %session.callee.short(),
            ?status,
            "call resolved while ringing"
        );
        Ok(outcome)
    }

    /// End a session from either side. Active sessions resolve as `Ended`
    /// with a server-computed duration; a caller ending a still-ringing
    /// session withdraws it (`Missed`). A non-existent session is a no-op
    /// -- both sides hanging up near-simultaneously must not error.
    pub async fn end(&self, issuer: &UserId, target: &UserId) -> Option<CallOutcome> {
        let mut table = self.table.lock().await;
        let pair = PairKey::new(issuer, target);

        let session = table.remove(&pair)?;
        let status = match session.state {
            CallState::Active => CallStatus::Ended,
            CallState::Ringing if issuer == &session.caller => CallStatus::Missed,
            CallState::Ringing => CallStatus::Ended,
        };
        let outcome = CallOutcome::new(&session, status);

        self.registry.send(target, &ServerEvent::CallEnded).await;

        info!(
            caller = %session.caller.short(),
            callee = %session.callee.short(),
            ?status,
            duration_secs = outcome.duration_secs,
            "call ended"
        );
        Some(outcome)
    }

    /// Mandatory cleanup when an identity's last live connection goes
    /// away: its session (if any) resolves and the surviving participant
    /// receives exactly one `callEnded`.
    pub async fn handle_disconnect(&self, identity: &UserId) -> Option<CallOutcome> {
        let mut table = self.table.lock().await;
        let pair = table.busy.get(identity).cloned()?;
        let session = table.remove(&pair)?;

        let status = match session.state {
            CallState::Active => CallStatus::Ended,
            CallState::Ringing if identity == &session.caller => CallStatus::Missed,
            CallState::Ringing => CallStatus::Ended,
        };
        let outcome = CallOutcome::new(&session, status);

        if let Some(other) = pair.peer_of(identity) {
            self.registry.send(other, &ServerEvent::CallEnded).await;
        }

        info!(
            identity = %identity.short(),
            ?status,
            "call resolved by disconnect"
        );
        Some(outcome)
    }

    /// Number of ringing/active sessions (diagnostics).
    pub async fn session_count(&self) -> usize {
        self.table.lock().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn offer() -> SignalBlob {
        SignalBlob(serde_json::json!({"type": "offer", "sdp": "v=0"}))
    }

    fn answer() -> SignalBlob {
        SignalBlob(serde_json::json!({"type": "answer", "sdp": "v=0"}))
    }

    struct Rig {
        registry: Arc<ConnectionRegistry>,
        calls: CallSessionManager,
    }

    impl Rig {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let calls = CallSessionManager::new(registry.clone());
            Self { registry, calls }
        }

        async fn connect(&self, name: &str) -> mpsc::Receiver<ServerEvent> {
            let (tx, rx) = mpsc::channel(16);
            self.registry
                .register(&UserId::from(name), causerie_shared::ConnectionId::new(), tx)
                .await;
            rx
        }
    }

    #[tokio::test]
    async fn initiate_rings_every_callee_device() {
        let rig = Rig::new();
        let mut bob_a = rig.connect("bob").await;
        let mut bob_b = rig.connect("bob").await;

        let outcome = rig
            .calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        assert_eq!(outcome, InitiateOutcome::Ringing);

        for rx in [&mut bob_a, &mut bob_b] {
            match rx.try_recv().unwrap() {
                ServerEvent::IncomingCall {
                    caller_identity,
                    caller_display_name,
                    ..
                } => {
                    assert_eq!(caller_identity, UserId::from("alice"));
                    assert_eq!(caller_display_name, "Alice");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn offline_callee_resolves_missed_without_ringing() {
        let rig = Rig::new();

        let outcome = rig
            .calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        assert_eq!(outcome, InitiateOutcome::Missed);
        assert_eq!(rig.calls.session_count().await, 0);

        // No lingering session: a later attempt with the callee online rings.
        let _bob = rig.connect("bob").await;
        let outcome = rig
            .calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        assert_eq!(outcome, InitiateOutcome::Ringing);
    }

    #[tokio::test]
    async fn concurrent_initiates_yield_exactly_one_session() {
        let rig = Rig::new();
        let _alice = rig.connect("alice").await;
        let _bob = rig.connect("bob").await;

        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let (a, b) = tokio::join!(
            rig.calls.initiate(&alice, &bob, "Alice", offer()),
            rig.calls.initiate(&bob, &alice, "Bob", offer()),
        );

        let wins = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(InitiateOutcome::Ringing)))
            .count();
        let losses = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(SignalError::AlreadyInCall)))
            .count();
        assert_eq!((wins, losses), (1, 1));
        assert_eq!(rig.calls.session_count().await, 1);
    }

    #[tokio::test]
    async fn busy_party_refuses_third_caller() {
        let rig = Rig::new();
        let _bob = rig.connect("bob").await;
        let _carol = rig.connect("carol").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();

        let result = rig
            .calls
            .initiate(&UserId::from("carol"), &UserId::from("bob"), "Carol", offer())
            .await;
        assert_eq!(result, Err(SignalError::AlreadyInCall));

        // The busy caller cannot dial out either.
        let result = rig
            .calls
            .initiate(&UserId::from("alice"), &UserId::from("carol"), "Alice", offer())
            .await;
        assert_eq!(result, Err(SignalError::AlreadyInCall));
    }

    #[tokio::test]
    async fn self_call_is_refused() {
        let rig = Rig::new();
        let _alice = rig.connect("alice").await;
        let result = rig
            .calls
            .initiate(&UserId::from("alice"), &UserId::from("alice"), "Alice", offer())
            .await;
        assert_eq!(result, Err(SignalError::AlreadyInCall));
    }

    #[tokio::test]
    async fn accept_forwards_answer_to_caller() {
        let rig = Rig::new();
        let mut alice = rig.connect("alice").await;
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();

        rig.calls
            .accept(&UserId::from("bob"), &UserId::from("alice"), answer())
            .await
            .unwrap();

        assert_eq!(
            alice.try_recv().unwrap(),
            ServerEvent::CallAccepted(answer())
        );
    }

    #[tokio::test]
    async fn accept_without_pending_session_is_no_such_session() {
        let rig = Rig::new();
        let result = rig
            .calls
            .accept(&UserId::from("bob"), &UserId::from("alice"), answer())
            .await;
        assert_eq!(result, Err(SignalError::NoSuchSession));
    }

    #[tokio::test]
    async fn only_the_callee_can_accept() {
        let rig = Rig::new();
        let _alice = rig.connect("alice").await;
        let _bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();

        // The caller answering its own offer is a protocol violation.
        let result = rig
            .calls
            .accept(&UserId::from("alice"), &UserId::from("bob"), answer())
            .await;
        assert_eq!(result, Err(SignalError::NoSuchSession));
    }

    #[tokio::test]
    async fn callee_reject_notifies_caller() {
        let rig = Rig::new();
        let mut alice = rig.connect("alice").await;
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();

        let outcome = rig
            .calls
            .reject(&UserId::from("bob"), &UserId::from("alice"))
            .await
            .unwrap();
        assert_eq!(outcome.status, CallStatus::Rejected);
        assert_eq!(alice.try_recv().unwrap(), ServerEvent::CallRejected);
        assert_eq!(rig.calls.session_count().await, 0);
    }

    #[tokio::test]
    async fn caller_withdrawal_resolves_missed_and_dismisses_callee() {
        let rig = Rig::new();
        let _alice = rig.connect("alice").await;
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();

        let outcome = rig
            .calls
            .reject(&UserId::from("alice"), &UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(outcome.status, CallStatus::Missed);
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::CallRejected);
    }

    #[tokio::test]
    async fn end_active_call_notifies_peer_once() {
        let rig = Rig::new();
        let mut alice = rig.connect("alice").await;
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();
        rig.calls
            .accept(&UserId::from("bob"), &UserId::from("alice"), answer())
            .await
            .unwrap();
        alice.try_recv().unwrap();

        let outcome = rig
            .calls
            .end(&UserId::from("alice"), &UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(outcome.status, CallStatus::Ended);
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::CallEnded);

        // The race where both sides hang up: the second end is a no-op.
        assert!(rig
            .calls
            .end(&UserId::from("bob"), &UserId::from("alice"))
            .await
            .is_none());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_during_active_call_ends_it() {
        let rig = Rig::new();
        let _alice = rig.connect("alice").await;
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();
        rig.calls
            .accept(&UserId::from("bob"), &UserId::from("alice"), answer())
            .await
            .unwrap();

        let outcome = rig.calls.handle_disconnect(&UserId::from("alice")).await.unwrap();
        assert_eq!(outcome.status, CallStatus::Ended);
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::CallEnded);

        // Running the cleanup again has no further effect.
        assert!(rig.calls.handle_disconnect(&UserId::from("alice")).await.is_none());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn caller_disconnect_while_ringing_is_missed() {
        let rig = Rig::new();
        let mut bob = rig.connect("bob").await;

        rig.calls
            .initiate(&UserId::from("alice"), &UserId::from("bob"), "Alice", offer())
            .await
            .unwrap();
        bob.try_recv().unwrap();

        let outcome = rig.calls.handle_disconnect(&UserId::from("alice")).await.unwrap();
        assert_eq!(outcome.status, CallStatus::Missed);
        assert_eq!(outcome.duration_secs, 0);
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::CallEnded);
    }
}
