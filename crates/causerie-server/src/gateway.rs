//! The realtime channel: one WebSocket per connected device.
//!
//! Each socket gets a bounded outbound queue drained by a writer task; the
//! read loop parses [`ClientEvent`] frames and drives the shared services.
//! Closing the socket runs the mandatory cleanup path: unregister, and if
//! that was the identity's last connection, resolve its call session and
//! notify the surviving participant.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use causerie_realtime::{CallOutcome, InitiateOutcome};
use causerie_shared::constants::{CONNECTION_QUEUE_DEPTH, MAX_FRAME_SIZE};
use causerie_shared::protocol::{CallRecordBody, MessageKind, SignalCode, UnavailableReason};
use causerie_shared::{ClientEvent, ConnectionId, ServerEvent, SignalError, UserId};
use causerie_store::NewMessage;

use crate::api::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(CONNECTION_QUEUE_DEPTH);

    debug!(connection = %connection, "realtime channel opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "failed to serialize server event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut joined: Option<UserId> = None;

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection = %connection, error = %e, "socket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_event(event, &state, connection, &tx, &mut joined).await;
                }
                Err(e) => {
                    debug!(connection = %connection, error = %e, "unparseable frame dropped");
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; binary frames are
            // not part of the contract.
            _ => {}
        }
    }

    state.registry.unregister(connection).await;
    if let Some(identity) = joined {
        if state.registry.connections_for(&identity).await.is_empty() {
            if let Some(outcome) = state.calls.handle_disconnect(&identity).await {
                persist_call_record(&state, &outcome).await;
            }
        }
        info!(identity = %identity.short(), connection = %connection, "realtime channel closed");
    }
    writer.abort();
}

async fn handle_event(
    event: ClientEvent,
    state: &AppState,
    connection: ConnectionId,
    tx: &mpsc::Sender<ServerEvent>,
    joined: &mut Option<UserId>,
) {
    match event {
        ClientEvent::Join(identity) => {
            state
                .registry
                .register(&identity, connection, tx.clone())
                .await;
            info!(identity = %identity.short(), connection = %connection, "joined");
            *joined = Some(identity);
        }

        ClientEvent::SendMessage(draft) => {
            let Some(sender) = joined.as_ref() else {
                debug!(connection = %connection, "sendMessage before join, dropped");
                return;
            };
            let new = NewMessage {
                sender_id: sender.clone(),
                recipient_id: draft.recipient_id,
                content: draft.content,
                kind: draft.kind,
                encrypted: draft.encrypted,
            };
            // Fire-and-forget path: a failed persist is logged and the
            // message is gone. Clients that need confirmation use the
            // request/response surface.
            if let Err(e) = state.dispatcher.send(new).await {
                error!(error = %e, "socket message failed to persist");
            }
        }

        ClientEvent::CallUser {
            callee_identity,
            offer,
            caller_identity,
            caller_display_name,
        } => {
            let Some(caller) = joined.as_ref() else {
                debug!(connection = %connection, "callUser before join, dropped");
                return;
            };
            if caller != &caller_identity {
                warn!(
                    claimed = %caller_identity.short(),
                    registered = %caller.short(),
                    "callerIdentity mismatch, using registered identity"
                );
            }
            match state
                .calls
                .initiate(caller, &callee_identity, &caller_display_name, offer)
                .await
            {
                Ok(InitiateOutcome::Ringing) => {}
                Ok(InitiateOutcome::Missed) => {
                    let _ = tx.try_send(ServerEvent::CallUnavailable {
                        reason: UnavailableReason::Offline,
                    });
                    let outcome = CallOutcome {
                        caller: caller.clone(),
                        callee: callee_identity,
                        status: causerie_shared::protocol::CallStatus::Missed,
                        duration_secs: 0,
                    };
                    persist_call_record(state, &outcome).await;
                }
                Err(SignalError::AlreadyInCall) => {
                    let _ = tx.try_send(ServerEvent::CallUnavailable {
                        reason: UnavailableReason::Busy,
                    });
                }
                Err(SignalError::NoSuchSession) => {
                    let _ = tx.try_send(ServerEvent::CallError {
                        code: SignalCode::NoSuchSession,
                    });
                }
            }
        }

        ClientEvent::AnswerCall {
            callee_target,
            answer,
        } => {
            let Some(callee) = joined.as_ref() else {
                return;
            };
            if let Err(e) = state.calls.accept(callee, &callee_target, answer).await {
                debug!(error = %e, "answerCall raced a resolved session");
                let _ = tx.try_send(ServerEvent::CallError {
                    code: SignalCode::NoSuchSession,
                });
            }
        }

        ClientEvent::RejectCall { target } => {
            let Some(issuer) = joined.as_ref() else {
                return;
            };
            match state.calls.reject(issuer, &target).await {
                Ok(outcome) => persist_call_record(state, &outcome).await,
                Err(e) => {
                    debug!(error = %e, "rejectCall raced a resolved session");
                    let _ = tx.try_send(ServerEvent::CallError {
                        code: SignalCode::NoSuchSession,
                    });
                }
            }
        }

        ClientEvent::EndCall { target } => {
            let Some(issuer) = joined.as_ref() else {
                return;
            };
            // A missing session is the both-sides-hung-up race; nothing to do.
            if let Some(outcome) = state.calls.end(issuer, &target).await {
                persist_call_record(state, &outcome).await;
            }
        }
    }
}

/// Persist a `call-record` message for a terminal call outcome. Duration
/// comes from the session's server-side stamp.
async fn persist_call_record(state: &AppState, outcome: &CallOutcome) {
    let body = CallRecordBody {
        status: outcome.status,
        duration_secs: outcome.duration_secs,
    };
    let content = match serde_json::to_string(&body) {
        Ok(content) => content,
        Err(e) => {
            error!(error = %e, "failed to encode call record");
            return;
        }
    };

    let new = NewMessage {
        sender_id: outcome.caller.clone(),
        recipient_id: outcome.callee.clone(),
        content,
        kind: MessageKind::CallRecord,
        encrypted: false,
    };
    if let Err(e) = state.dispatcher.send(new).await {
        error!(error = %e, "failed to persist call record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use causerie_realtime::{
        CallSessionManager, ConnectionRegistry, ConversationSync, MessageDispatcher, SharedStore,
    };
    use causerie_shared::protocol::{CallStatus, MessageDraft};
    use causerie_shared::SignalBlob;
    use causerie_store::Database;

    use crate::config::ServerConfig;
    use crate::rate_limit::RateLimiter;

    fn test_state() -> AppState {
        let store: SharedStore =
            Arc::new(tokio::sync::Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(ConnectionRegistry::new());
        AppState {
            calls: Arc::new(CallSessionManager::new(registry.clone())),
            dispatcher: Arc::new(MessageDispatcher::new(store.clone(), registry.clone())),
            sync: Arc::new(ConversationSync::new(store)),
            registry,
            rate_limiter: RateLimiter::default(),
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn offer() -> SignalBlob {
        SignalBlob(serde_json::json!({"type": "offer"}))
    }

    #[tokio::test]
    async fn join_registers_the_connection() {
        let state = test_state();
        let connection = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut joined = None;

        handle_event(
            ClientEvent::Join(UserId::from("alice")),
            &state,
            connection,
            &tx,
            &mut joined,
        )
        .await;

        assert_eq!(joined, Some(UserId::from("alice")));
        assert!(state.registry.is_online(&UserId::from("alice")).await);
    }

    #[tokio::test]
    async fn send_message_before_join_is_dropped() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(8);
        let mut joined = None;

        handle_event(
            ClientEvent::SendMessage(MessageDraft {
                recipient_id: UserId::from("bob"),
                content: "hi".into(),
                kind: MessageKind::Text,
                encrypted: true,
            }),
            &state,
            ConnectionId::new(),
            &tx,
            &mut joined,
        )
        .await;

        let page = state
            .sync
            .history(&UserId::from("bob"), &UserId::from("anyone"), 0, 10)
            .await
            .unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn send_message_persists_and_delivers() {
        let state = test_state();
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        state
            .registry
            .register(&UserId::from("bob"), ConnectionId::new(), bob_tx)
            .await;

        let (tx, _rx) = mpsc::channel(8);
        let mut joined = Some(UserId::from("alice"));
        handle_event(
            ClientEvent::SendMessage(MessageDraft {
                recipient_id: UserId::from("bob"),
                content: "hi".into(),
                kind: MessageKind::Text,
                encrypted: true,
            }),
            &state,
            ConnectionId::new(),
            &tx,
            &mut joined,
        )
        .await;

        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::ReceiveMessage(_)
        ));
        let page = state
            .sync
            .history(&UserId::from("alice"), &UserId::from("bob"), 0, 10)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
    }

    #[tokio::test]
    async fn offline_callee_gets_unavailable_and_a_missed_record() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = Some(UserId::from("alice"));

        handle_event(
            ClientEvent::CallUser {
                callee_identity: UserId::from("bob"),
                offer: offer(),
                caller_identity: UserId::from("alice"),
                caller_display_name: "Alice".into(),
            },
            &state,
            ConnectionId::new(),
            &tx,
            &mut joined,
        )
        .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::CallUnavailable {
                reason: UnavailableReason::Offline
            }
        );

        let page = state
            .sync
            .history(&UserId::from("alice"), &UserId::from("bob"), 0, 10)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        let record = &page.messages[0];
        assert_eq!(record.kind, MessageKind::CallRecord);
        let body: CallRecordBody = serde_json::from_str(&record.content).unwrap();
        assert_eq!(body.status, CallStatus::Missed);
        assert_eq!(body.duration_secs, 0);
    }

    #[tokio::test]
    async fn busy_caller_gets_busy_signal() {
        let state = test_state();
        let (bob_tx, _bob_rx) = mpsc::channel(8);
        state
            .registry
            .register(&UserId::from("bob"), ConnectionId::new(), bob_tx)
            .await;

        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = Some(UserId::from("alice"));
        let call = ClientEvent::CallUser {
            callee_identity: UserId::from("bob"),
            offer: offer(),
            caller_identity: UserId::from("alice"),
            caller_display_name: "Alice".into(),
        };

        handle_event(call.clone(), &state, ConnectionId::new(), &tx, &mut joined).await;
        assert!(rx.try_recv().is_err());

        handle_event(call, &state, ConnectionId::new(), &tx, &mut joined).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::CallUnavailable {
                reason: UnavailableReason::Busy
            }
        );
    }

    #[tokio::test]
    async fn stale_answer_yields_no_such_session() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = Some(UserId::from("bob"));

        handle_event(
            ClientEvent::AnswerCall {
                callee_target: UserId::from("alice"),
                answer: offer(),
            },
            &state,
            ConnectionId::new(),
            &tx,
            &mut joined,
        )
        .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::CallError {
                code: SignalCode::NoSuchSession
            }
        );
    }
}
