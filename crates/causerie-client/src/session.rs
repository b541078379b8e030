//! Client-side session state.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use causerie_shared::protocol::{MessageDraft, MessageKind, SignalCode};
use causerie_shared::{ClientEvent, ServerEvent, SignalBlob, StoredMessage, UserId};

/// Local mirror of the call state machine. The server owns the
/// authoritative session; this only tracks what has been observed.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUiState {
    Idle,
    /// An offer went out; waiting for the callee.
    Dialing { peer: UserId },
    /// An offer came in; waiting for the user.
    RingingIn {
        caller: UserId,
        caller_display_name: String,
        offer: SignalBlob,
    },
    InCall {
        peer: UserId,
        connected_at: DateTime<Utc>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("already in a call")]
    Busy,
    #[error("no conversation selected")]
    NoConversation,
    #[error("no incoming call to act on")]
    NoIncomingCall,
    #[error("no call to hang up")]
    NotInCall,
}

/// What a reconnecting shell must do before trusting any local state:
/// re-register, then re-fetch conversations and the selected history. The
/// realtime channel guarantees nothing across a disconnect gap.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPlan {
    pub join: ClientEvent,
    pub refresh_conversations: bool,
    pub refresh_history_with: Option<UserId>,
}

pub struct ClientSession {
    identity: UserId,
    display_name: String,
    selected_peer: Option<UserId>,
    timeline: Vec<StoredMessage>,
    call: CallUiState,
    connected: bool,
}

impl ClientSession {
    pub fn new(identity: UserId, display_name: impl Into<String>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            selected_peer: None,
            timeline: Vec::new(),
            call: CallUiState::Idle,
            connected: false,
        }
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn call_state(&self) -> &CallUiState {
        &self.call
    }

    pub fn timeline(&self) -> &[StoredMessage] {
        &self.timeline
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Switch the active conversation. The buffered timeline belongs to
    /// the previous peer and is discarded; the shell refetches history.
    pub fn select_conversation(&mut self, peer: UserId) {
        if self.selected_peer.as_ref() != Some(&peer) {
            self.timeline.clear();
        }
        self.selected_peer = Some(peer);
    }

    pub fn selected_peer(&self) -> Option<&UserId> {
        self.selected_peer.as_ref()
    }

    /// Consume a server event, advancing local state. Some events demand a
    /// reply (e.g. auto-rejecting an offer that raced past the server's
    /// busy check); the returned event must be emitted by the shell.
    pub fn apply(&mut self, event: ServerEvent) -> Option<ClientEvent> {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                if self.involves_selected(&message) {
                    self.merge_message(message);
                }
                None
            }
            ServerEvent::IncomingCall {
                offer,
                caller_identity,
                caller_display_name,
            } => {
                if self.call != CallUiState::Idle {
                    debug!(caller = %caller_identity.short(), "busy, auto-rejecting offer");
                    return Some(ClientEvent::RejectCall {
                        target: caller_identity,
                    });
                }
                self.call = CallUiState::RingingIn {
                    caller: caller_identity,
                    caller_display_name,
                    offer,
                };
                None
            }
            ServerEvent::CallAccepted(_answer) => {
                if let CallUiState::Dialing { peer } = &self.call {
                    self.call = CallUiState::InCall {
                        peer: peer.clone(),
                        connected_at: Utc::now(),
                    };
                }
                None
            }
            ServerEvent::CallRejected | ServerEvent::CallEnded => {
                self.call = CallUiState::Idle;
                None
            }
            ServerEvent::CallUnavailable { reason } => {
                if matches!(self.call, CallUiState::Dialing { .. }) {
                    debug!(?reason, "call attempt resolved without ringing");
                    self.call = CallUiState::Idle;
                }
                None
            }
            ServerEvent::CallError { code } => {
                // Signaling races (the other side resolved first) are not
                // user-visible failures.
                match code {
                    SignalCode::NoSuchSession => debug!("stale signaling action ignored"),
                }
                None
            }
        }
    }

    /// Begin an outgoing call to `callee`.
    pub fn start_call(
        &mut self,
        callee: UserId,
        offer: SignalBlob,
    ) -> Result<ClientEvent, SessionError> {
        if self.call != CallUiState::Idle {
            return Err(SessionError::Busy);
        }
        self.call = CallUiState::Dialing {
            peer: callee.clone(),
        };
        Ok(ClientEvent::CallUser {
            callee_identity: callee,
            offer,
            caller_identity: self.identity.clone(),
            caller_display_name: self.display_name.clone(),
        })
    }

    /// Accept the currently ringing call.
    pub fn answer_call(&mut self, answer: SignalBlob) -> Result<ClientEvent, SessionError> {
        let CallUiState::RingingIn { caller, .. } = &self.call else {
            return Err(SessionError::NoIncomingCall);
        };
        let caller = caller.clone();
        self.call = CallUiState::InCall {
            peer: caller.clone(),
            connected_at: Utc::now(),
        };
        Ok(ClientEvent::AnswerCall {
            callee_target: caller,
            answer,
        })
    }

    /// Decline the currently ringing call.
    pub fn reject_call(&mut self) -> Result<ClientEvent, SessionError> {
        let CallUiState::RingingIn { caller, .. } = &self.call else {
            return Err(SessionError::NoIncomingCall);
        };
        let caller = caller.clone();
        self.call = CallUiState::Idle;
        Ok(ClientEvent::RejectCall { target: caller })
    }

    /// Hang up: withdraws a dialing attempt, or ends an active call.
    pub fn hang_up(&mut self) -> Result<ClientEvent, SessionError> {
        let event = match &self.call {
            CallUiState::Dialing { peer } => ClientEvent::RejectCall {
                target: peer.clone(),
            },
            CallUiState::InCall { peer, .. } => ClientEvent::EndCall {
                target: peer.clone(),
            },
            _ => return Err(SessionError::NotInCall),
        };
        self.call = CallUiState::Idle;
        Ok(event)
    }

    /// Build a send event for the selected conversation. The message does
    /// not enter the local timeline here -- only on confirmation, so a
    /// failed persist never shows a phantom entry.
    pub fn compose(
        &self,
        content: impl Into<String>,
        encrypted: bool,
    ) -> Result<ClientEvent, SessionError> {
        let peer = self
            .selected_peer
            .clone()
            .ok_or(SessionError::NoConversation)?;
        Ok(ClientEvent::SendMessage(MessageDraft {
            recipient_id: peer,
            content: content.into(),
            kind: MessageKind::Text,
            encrypted,
        }))
    }

    /// Record a message the server confirmed as persisted.
    pub fn confirm_sent(&mut self, message: StoredMessage) {
        if self.involves_selected(&message) {
            self.merge_message(message);
        }
    }

    /// Merge one history page into the timeline, de-duplicating on the
    /// store-assigned message identity.
    pub fn merge_history(&mut self, messages: Vec<StoredMessage>) {
        for message in messages {
            self.merge_message(message);
        }
    }

    /// The realtime channel dropped. All mirrored state is stale.
    pub fn handle_disconnect(&mut self) {
        self.connected = false;
        self.call = CallUiState::Idle;
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
    }

    /// Steps to run, in order, after the channel is re-established.
    pub fn reconnect_plan(&self) -> ReconnectPlan {
        ReconnectPlan {
            join: ClientEvent::Join(self.identity.clone()),
            refresh_conversations: true,
            refresh_history_with: self.selected_peer.clone(),
        }
    }

    fn involves_selected(&self, message: &StoredMessage) -> bool {
        let Some(peer) = &self.selected_peer else {
            return false;
        };
        let pair = (&message.sender_id, &message.recipient_id);
        pair == (peer, &self.identity) || pair == (&self.identity, peer)
    }

    fn merge_message(&mut self, message: StoredMessage) {
        if self.timeline.iter().any(|m| m.id == message.id) {
            return;
        }
        self.timeline.push(message);
        self.timeline
            .sort_by(|a, b| (a.created_at, a.seq).cmp(&(b.created_at, b.seq)));
    }
}
