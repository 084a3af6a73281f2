//! Fan-out of server messages to the sessions attached to a vault.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::protocol::ServerMessage;
use crate::error::{Error, Result};
use crate::models::VaultId;

/// Identifies one connected session
pub type SessionId = u64;

/// Sending half of a session's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
}

impl Outbox {
    /// Queue a message for this session, waiting while the queue is full.
    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Closed("session outbox".to_string()))
    }
}

/// Everything a transport needs to drive a session registered with the hub.
#[derive(Debug)]
pub struct SessionLink {
    pub id: SessionId,
    pub outbox: Outbox,
    pub inbox: mpsc::Receiver<ServerMessage>,
    /// Cancelled when the hub evicts the session
    pub evicted: CancellationToken,
}

#[derive(Clone)]
struct Peer {
    tx: mpsc::Sender<ServerMessage>,
    evicted: CancellationToken,
}

/// Registry of live sessions per vault.
pub struct SessionHub {
    vaults: RwLock<HashMap<VaultId, HashMap<SessionId, Peer>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    retries: usize,
}

impl SessionHub {
    pub fn new(queue_capacity: usize, retries: usize) -> Self {
        Self {
            vaults: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            retries: retries.max(1),
        }
    }

    /// Register a new session on `vault`.
    pub async fn join(&self, vault: VaultId) -> SessionLink {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, inbox) = mpsc::channel(self.queue_capacity);
        let evicted = CancellationToken::new();
        self.vaults.write().await.entry(vault).or_default().insert(
            id,
            Peer {
                tx: tx.clone(),
                evicted: evicted.clone(),
            },
        );
        tracing::debug!(vault = %vault, session = id, "Session joined");
        SessionLink {
            id,
            outbox: Outbox { tx },
            inbox,
            evicted,
        }
    }

    /// Remove a session; a no-op if it was already evicted.
    pub async fn leave(&self, vault: &VaultId, id: SessionId) {
        let mut vaults = self.vaults.write().await;
        if let Some(peers) = vaults.get_mut(vault) {
            peers.remove(&id);
            if peers.is_empty() {
                vaults.remove(vault);
            }
        }
        tracing::debug!(vault = %vault, session = id, "Session left");
    }

    /// Deliver `message` to every session on `vault` except `origin`.
    ///
    /// Sends never wait on a slow peer, and the registry is not locked while
    /// retrying. A peer whose queue stays full is evicted and its session
    /// cancelled. Returns the number of peers reached.
    pub async fn broadcast(&self, vault: &VaultId, origin: SessionId, message: &ServerMessage) -> usize {
        let peers: Vec<(SessionId, Peer)> = {
            let vaults = self.vaults.read().await;
            let Some(peers) = vaults.get(vault) else {
                return 0;
            };
            peers
                .iter()
                .filter(|&(&id, _)| id != origin)
                .map(|(&id, peer)| (id, peer.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, peer) in &peers {
            match self.try_deliver(peer, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(vault = %vault, session = id, "Session queue full, evicting");
                    peer.evicted.cancel();
                    dead.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(vault = %vault, session = id, "Session already closed");
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut vaults = self.vaults.write().await;
            if let Some(peers) = vaults.get_mut(vault) {
                for id in dead {
                    peers.remove(&id);
                }
                if peers.is_empty() {
                    vaults.remove(vault);
                }
            }
        }
        delivered
    }

    async fn try_deliver(
        &self,
        peer: &Peer,
        message: ServerMessage,
    ) -> std::result::Result<(), mpsc::error::TrySendError<ServerMessage>> {
        let mut message = message;
        let mut attempt = 1;
        loop {
            match peer.tx.try_send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(returned)) if attempt < self.retries => {
                    message = returned;
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Number of live sessions across all vaults
    pub async fn session_count(&self) -> usize {
        self.vaults.read().await.values().map(HashMap::len).sum()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(256, 3)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::protocol::PathRef;

    fn ping(path: &str) -> ServerMessage {
        ServerMessage::NoteSyncNeedPush(PathRef::new(path))
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin_and_other_vaults() {
        let hub = SessionHub::new(8, 1);
        let vault = VaultId::new();
        let mut origin = hub.join(vault).await;
        let mut peer = hub.join(vault).await;
        let mut stranger = hub.join(VaultId::new()).await;

        assert_eq!(hub.broadcast(&vault, origin.id, &ping("a")).await, 1);
        assert_eq!(peer.inbox.recv().await, Some(ping("a")));
        assert!(origin.inbox.try_recv().is_err());
        assert!(stranger.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_peer() {
        let hub = SessionHub::new(1, 2);
        let vault = VaultId::new();
        let origin = hub.join(vault).await;
        let slow = hub.join(vault).await;

        assert_eq!(hub.broadcast(&vault, origin.id, &ping("a")).await, 1);
        assert_eq!(hub.broadcast(&vault, origin.id, &ping("b")).await, 0);
        assert!(slow.evicted.is_cancelled());
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_registry_stays_usable_while_retrying_slow_peer() {
        let hub = Arc::new(SessionHub::new(1, 10_000));
        let vault = VaultId::new();
        let origin = hub.join(vault).await;
        let slow = hub.join(vault).await;
        assert_eq!(hub.broadcast(&vault, origin.id, &ping("a")).await, 1);

        let retrying = tokio::spawn({
            let hub = Arc::clone(&hub);
            let origin = origin.id;
            async move { hub.broadcast(&vault, origin, &ping("b")).await }
        });
        tokio::task::yield_now().await;

        let late = hub.join(vault).await;
        assert!(!retrying.is_finished());
        hub.leave(&vault, late.id).await;

        assert_eq!(retrying.await.unwrap(), 0);
        assert!(slow.evicted.is_cancelled());
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_closed_peer_is_dropped() {
        let hub = SessionHub::new(4, 1);
        let vault = VaultId::new();
        let origin = hub.join(vault).await;
        let gone = hub.join(vault).await;
        drop(gone);

        assert_eq!(hub.broadcast(&vault, origin.id, &ping("a")).await, 0);
        assert_eq!(hub.session_count().await, 1);
        hub.leave(&vault, origin.id).await;
        assert_eq!(hub.session_count().await, 0);
    }
}
