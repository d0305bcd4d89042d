use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use encore_types::events::ServerEvent;

pub type ConnectionId = Uuid;

/// Sending half of one live transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle for `user_id` and the receiver its transport drains.
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queue an event for this connection. Returns false if the transport is
    /// already gone; the event is dropped in that case.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Live connections per principal. A user may hold any number at once.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<Uuid, HashMap<ConnectionId, ConnectionHandle>>,
    owners: HashMap<ConnectionId, Uuid>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        inner.owners.insert(handle.id, handle.user_id);
        let conns = inner.by_user.entry(handle.user_id).or_default();
        conns.insert(handle.id, handle.clone());
        debug!(
            "Registered connection {} for user {} ({} live)",
            handle.id,
            handle.user_id,
            conns.len()
        );
    }

    /// Remove a connection from whichever user owns it. Unknown ids are a no-op.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write().await;
        let user_id = inner.owners.remove(&conn_id)?;

        let conns = inner.by_user.get_mut(&user_id)?;
        let removed = conns.remove(&conn_id);
        if conns.is_empty() {
            inner.by_user.remove(&user_id);
        }
        debug!("Unregistered connection {} for user {}", conn_id, user_id);
        removed
    }

    /// Snapshot of a user's live connections.
    pub async fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Best-effort push to every live connection of `user_id`. Returns how many
    /// connections accepted the event; users with none are skipped silently.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let targets = self.connections_of(user_id).await;
        let delivered = targets.iter().filter(|h| h.send(event.clone())).count();
        trace!("{} -> user {} ({} connections)", event.name(), user_id, delivered);
        delivered
    }

    pub async fn is_registered(&self, conn_id: ConnectionId) -> bool {
        self.inner.read().await.owners.contains_key(&conn_id)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.owners.len()
    }
}
