//! Message dispatch: persist first, then deliver.
//!
//! Persistence is authoritative and unconditional; live delivery is a
//! best-effort optimization layered on top. A recipient who is offline
//! simply receives the message on the next history sync, and a message
//! that fails to persist is never delivered at all.

use std::sync::Arc;

use tracing::debug;

use causerie_shared::{ServerEvent, StoredMessage};
use causerie_store::{NewMessage, StoreError};

use crate::registry::ConnectionRegistry;
use crate::SharedStore;

/// Which path the message took after persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// At least one live connection of the recipient accepted the event.
    Online,
    /// No live delivery; the recipient picks it up on the next sync.
    Offline,
}

pub struct MessageDispatcher {
    store: SharedStore,
    registry: Arc<ConnectionRegistry>,
}

impl MessageDispatcher {
    pub fn new(store: SharedStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Persist a message and attempt live delivery to the recipient.
    ///
    /// The store lock serializes persistence, so messages from one sender
    /// to one recipient become visible in submission order. The sender's
    /// own connections never receive a `receiveMessage` for a message they
    /// authored.
    pub async fn send(&self, new: NewMessage) -> Result<(StoredMessage, Delivery), StoreError> {
        let stored = {
            let mut db = self.store.lock().await;
            db.insert_message(&new)?
        };

        if stored.recipient_id == stored.sender_id {
            return Ok((stored, Delivery::Offline));
        }

        let delivered = self
            .registry
            .send(&stored.recipient_id, &ServerEvent::ReceiveMessage(stored.clone()))
            .await;

        debug!(
            message = %stored.id,
            recipient = %stored.recipient_id.short(),
            delivered,
            "message dispatched"
        );

        let delivery = if delivered {
            Delivery::Online
        } else {
            Delivery::Offline
        };
        Ok((stored, delivery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::{ConnectionId, UserId};
    use causerie_store::Database;
    use tokio::sync::{mpsc, Mutex};

    fn rig() -> (SharedStore, Arc<ConnectionRegistry>, MessageDispatcher) {
        let store: SharedStore = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = MessageDispatcher::new(store.clone(), registry.clone());
        (store, registry, dispatcher)
    }

    async fn connect(
        registry: &ConnectionRegistry,
        name: &str,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        registry
            .register(&UserId::from(name), ConnectionId::new(), tx)
            .await;
        rx
    }

    #[tokio::test]
    async fn persists_then_delivers_to_online_recipient() {
        let (_store, registry, dispatcher) = rig();
        let mut alice = connect(&registry, "alice").await;
        let mut bob = connect(&registry, "bob").await;

        let (stored, delivery) = dispatcher
            .send(NewMessage::text(
                UserId::from("alice"),
                UserId::from("bob"),
                "hello",
            ))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Online);
        match bob.try_recv().unwrap() {
            ServerEvent::ReceiveMessage(msg) => assert_eq!(msg.id, stored.id),
            other => panic!("unexpected event: {other:?}"),
        }
        // The author's own connections stay quiet.
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipient_is_a_normal_branch() {
        let (store, _registry, dispatcher) = rig();

        let (_, delivery) = dispatcher
            .send(NewMessage::text(
                UserId::from("alice"),
                UserId::from("bob"),
                "deliver later",
            ))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Offline);
        // Still persisted; recoverable via history.
        let db = store.lock().await;
        assert_eq!(
            db.count_between(&UserId::from("alice"), &UserId::from("bob"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn self_send_suppresses_echo() {
        let (_store, registry, dispatcher) = rig();
        let mut alice = connect(&registry, "alice").await;

        let (_, delivery) = dispatcher
            .send(NewMessage::text(
                UserId::from("alice"),
                UserId::from("alice"),
                "note to self",
            ))
            .await
            .unwrap();

        assert_eq!(delivery, Delivery::Offline);
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_persistence_never_delivers() {
        let (store, registry, dispatcher) = rig();
        let mut bob = connect(&registry, "bob").await;

        store
            .lock()
            .await
            .conn()
            .pragma_update(None, "query_only", "ON")
            .unwrap();

        let result = dispatcher
            .send(NewMessage::text(
                UserId::from("alice"),
                UserId::from("bob"),
                "doomed",
            ))
            .await;

        assert!(result.is_err());
        assert!(bob.try_recv().is_err());

        store
            .lock()
            .await
            .conn()
            .pragma_update(None, "query_only", "OFF")
            .unwrap();
        let db = store.lock().await;
        assert!(db.conversations_for(&UserId::from("bob")).unwrap().is_empty());
    }
}
