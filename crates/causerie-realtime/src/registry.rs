//! Connection registry: which live connections belong to which identity.
//!
//! The registry is the only component that adds or removes presence
//! entries. The identity map is sharded so that fan-out for unrelated
//! identities never contends on one lock; a flat `ConnectionId -> UserId`
//! binding index keeps `unregister` O(1) and idempotent.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use causerie_shared::constants::REGISTRY_SHARDS;
use causerie_shared::{ConnectionId, ServerEvent, UserId};

type Shard = HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>;

/// Result of removing a connection: the identity it was bound to and how
/// many of that identity's connections remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub identity: UserId,
    pub remaining: usize,
}

pub struct ConnectionRegistry {
    shards: Vec<RwLock<Shard>>,
    bindings: RwLock<HashMap<ConnectionId, UserId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_shards(REGISTRY_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| RwLock::new(Shard::new())).collect();
        Self {
            shards,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    fn shard_for(&self, identity: &UserId) -> &RwLock<Shard> {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Bind a connection to an identity. Idempotent per connection
    /// instance; re-registering the same connection under a different
    /// identity moves it (a connection is never bound to two identities at
    /// once). Registering a second connection for an identity adds it, it
    /// does not replace the first.
    pub async fn register(
        &self,
        identity: &UserId,
        connection: ConnectionId,
        tx: mpsc::Sender<ServerEvent>,
    ) {
        let previous = {
            let mut bindings = self.bindings.write().await;
            bindings.insert(connection, identity.clone())
        };

        if let Some(old) = previous {
            if &old != identity {
                self.remove_from_shard(&old, connection).await;
                debug!(connection = %connection, from = %old.short(), to = %identity.short(), "rebound connection");
            }
        }

        let mut shard = self.shard_for(identity).write().await;
        shard
            .entry(identity.clone())
            .or_default()
            .insert(connection, tx);

        debug!(identity = %identity.short(), connection = %connection, "registered connection");
    }

    /// Remove a connection. No-op (returns `None`) if it was never
    /// registered or is already gone.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<Unregistered> {
        let identity = {
            let mut bindings = self.bindings.write().await;
            bindings.remove(&connection)?
        };

        let remaining = self.remove_from_shard(&identity, connection).await;

        debug!(
            identity = %identity.short(),
            connection = %connection,
            remaining,
            "unregistered connection"
        );

        Some(Unregistered {
            identity,
            remaining,
        })
    }

    async fn remove_from_shard(&self, identity: &UserId, connection: ConnectionId) -> usize {
        let mut shard = self.shard_for(identity).write().await;
        let Some(conns) = shard.get_mut(identity) else {
            return 0;
        };
        conns.remove(&connection);
        let remaining = conns.len();
        if conns.is_empty() {
            shard.remove(identity);
        }
        remaining
    }

    /// Live connections for an identity. Empty is a normal result (peer
    /// offline).
    pub async fn connections_for(&self, identity: &UserId) -> Vec<ConnectionId> {
        let shard = self.shard_for(identity).read().await;
        shard
            .get(identity)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, identity: &UserId) -> bool {
        let shard = self.shard_for(identity).read().await;
        shard.get(identity).map_or(false, |c| !c.is_empty())
    }

    /// Total number of live connections across all identities.
    pub async fn connection_count(&self) -> usize {
        self.bindings.read().await.len()
    }

    /// Best-effort fan-out to every live connection of `identity`.
    ///
    /// Returns whether at least one connection accepted the event. Writes
    /// never block: the sender list is snapshotted before iterating, and a
    /// connection whose queue is closed or full is evicted on the spot
    /// (a consumer that far behind is indistinguishable from a dead one).
    pub async fn send(&self, identity: &UserId, event: &ServerEvent) -> bool {
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerEvent>)> = {
            let shard = self.shard_for(identity).read().await;
            match shard.get(identity) {
                Some(conns) => conns.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            trace!(identity = %identity.short(), "no live connections");
            return false;
        }

        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for (conn, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(identity = %identity.short(), connection = %conn, "evicting unresponsive connection");
                    dead.push(conn);
                }
            }
        }

        for conn in dead {
            self.unregister(conn).await;
        }

        delivered > 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::protocol::ServerEvent;

    fn channel(cap: usize) -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(cap)
    }

    #[tokio::test]
    async fn register_and_fan_out_to_all_devices() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let (tx1, mut rx1) = channel(8);
        let (tx2, mut rx2) = channel(8);

        registry.register(&alice, ConnectionId::new(), tx1).await;
        registry.register(&alice, ConnectionId::new(), tx2).await;
        assert_eq!(registry.connections_for(&alice).await.len(), 2);

        assert!(registry.send(&alice, &ServerEvent::CallEnded).await);
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::CallEnded);
        assert_eq!(rx2.try_recv().unwrap(), ServerEvent::CallEnded);
    }

    #[tokio::test]
    async fn send_to_offline_identity_reports_no_delivery() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(&UserId::from("ghost"), &ServerEvent::CallEnded).await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let conn = ConnectionId::new();
        let (tx, _rx) = channel(8);

        registry.register(&alice, conn, tx).await;

        let first = registry.unregister(conn).await;
        assert_eq!(
            first,
            Some(Unregistered {
                identity: alice.clone(),
                remaining: 0
            })
        );
        assert_eq!(registry.unregister(conn).await, None);
        assert!(!registry.is_online(&alice).await);
    }

    #[tokio::test]
    async fn register_same_connection_twice_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let conn = ConnectionId::new();
        let (tx, _rx) = channel(8);

        registry.register(&alice, conn, tx.clone()).await;
        registry.register(&alice, conn, tx).await;
        assert_eq!(registry.connections_for(&alice).await.len(), 1);
    }

    #[tokio::test]
    async fn rebinding_moves_the_connection() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        let (tx, _rx) = channel(8);

        registry.register(&UserId::from("alice"), conn, tx.clone()).await;
        registry.register(&UserId::from("bob"), conn, tx).await;

        assert!(!registry.is_online(&UserId::from("alice")).await);
        assert!(registry.is_online(&UserId::from("bob")).await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn slow_connection_is_evicted_without_stalling_others() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::from("alice");
        let (slow_tx, _slow_rx) = channel(1);
        let (ok_tx, mut ok_rx) = channel(8);

        let slow = ConnectionId::new();
        registry.register(&alice, slow, slow_tx.clone()).await;
        registry.register(&alice, ConnectionId::new(), ok_tx).await;

        // Fill the slow connection's queue.
        slow_tx.try_send(ServerEvent::CallEnded).unwrap();

        assert!(registry.send(&alice, &ServerEvent::CallRejected).await);
        assert_eq!(ok_rx.try_recv().unwrap(), ServerEvent::CallRejected);

        // The stalled connection is gone; the healthy one remains.
        assert_eq!(registry.connections_for(&alice).await.len(), 1);
    }
}
