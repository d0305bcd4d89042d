use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use encore_types::events::ServerEvent;
use encore_types::models::RoomId;

use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::rooms::RoomBroadcaster;

/// Owns every live connection: who holds it and which rooms it listens to.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    registry: ConnectionRegistry,
    rooms: RoomBroadcaster,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn rooms(&self) -> &RoomBroadcaster {
        &self.inner.rooms
    }

    /// Register a new connection for `user_id`. Returns (handle, receiver).
    pub async fn connect(&self, user_id: Uuid) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new(user_id);
        self.inner.registry.register(handle.clone()).await;
        (handle, rx)
    }

    /// Tear down a connection: unregister, then leave every room.
    /// Safe to call for unknown ids and while broadcasts are in flight.
    ///
    /// Unregistering first pairs with the re-check in `join_conversation`:
    /// a join that lands after `leave_all` sees the connection gone and
    /// undoes itself.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let handle = self.inner.registry.unregister(conn_id).await;
        let rooms = self.inner.rooms.leave_all(conn_id).await;
        if let Some(handle) = handle {
            info!(
                "Connection {} of user {} closed ({} rooms left)",
                conn_id,
                handle.user_id(),
                rooms
            );
        }
    }

    /// Join a registered connection to a conversation room. Returns false,
    /// leaving no membership behind, if the connection was torn down.
    pub async fn join_conversation(&self, handle: &ConnectionHandle, conversation_id: Uuid) -> bool {
        let room = RoomId::for_conversation(conversation_id);
        self.inner.rooms.join(handle, room.clone()).await;

        if self.inner.registry.is_registered(handle.id()).await {
            return true;
        }
        self.inner.rooms.leave(handle.id(), &room).await;
        debug!("Dropped join of closed connection {} to {}", handle.id(), room);
        false
    }

    /// Join every live connection of `user_id` to a conversation room.
    pub async fn join_user_to_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> usize {
        let mut joined = 0;
        for handle in self.inner.registry.connections_of(user_id).await {
            if self.join_conversation(&handle, conversation_id).await {
                joined += 1;
            }
        }
        joined
    }

    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.inner.registry.send_to_user(user_id, event).await
    }

    pub async fn broadcast_to_conversation(
        &self,
        conversation_id: Uuid,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        self.inner
            .rooms
            .broadcast_to_room(&RoomId::for_conversation(conversation_id), &event, except)
            .await
    }

    pub async fn close_conversation(&self, conversation_id: Uuid) -> usize {
        self.inner
            .rooms
            .close_room(&RoomId::for_conversation(conversation_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnect_removes_registration_and_rooms() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let (handle, _rx) = dispatcher.connect(user).await;
        dispatcher.join_conversation(&handle, conversation).await;
        assert!(dispatcher.registry().is_online(user).await);

        dispatcher.disconnect(handle.id()).await;
        assert!(!dispatcher.registry().is_online(user).await);
        assert!(dispatcher.rooms().rooms_of(handle.id()).await.is_empty());

        // Second teardown of the same connection is a no-op.
        dispatcher.disconnect(handle.id()).await;
    }

    #[tokio::test]
    async fn join_after_disconnect_leaves_no_membership() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let room = RoomId::for_conversation(conversation);

        let (_handle, _rx) = dispatcher.connect(user).await;
        let stale = dispatcher.registry().connections_of(user).await;
        dispatcher.disconnect(stale[0].id()).await;

        assert!(!dispatcher.join_conversation(&stale[0], conversation).await);
        assert!(dispatcher.rooms().rooms_of(stale[0].id()).await.is_empty());
        assert!(dispatcher.rooms().members(&room).await.is_empty());
        assert_eq!(dispatcher.join_user_to_conversation(user, conversation).await, 0);
    }

    #[tokio::test]
    async fn concurrent_join_and_disconnect_never_strand_a_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        for _ in 0..50 {
            let (handle, _rx) = dispatcher.connect(user).await;
            let handle_id = handle.id();
            let joiner = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.join_user_to_conversation(user, conversation).await })
            };
            let closer = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.disconnect(handle.id()).await })
            };
            joiner.await.unwrap();
            closer.await.unwrap();

            assert!(dispatcher.rooms().rooms_of(handle_id).await.is_empty());
        }
        assert!(dispatcher
            .rooms()
            .members(&RoomId::for_conversation(conversation))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn joins_all_live_connections_of_a_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let (_phone, mut phone_rx) = dispatcher.connect(user).await;
        let (_laptop, mut laptop_rx) = dispatcher.connect(user).await;

        assert_eq!(dispatcher.join_user_to_conversation(user, conversation).await, 2);

        let event = ServerEvent::Error { message: "x".into() };
        assert_eq!(dispatcher.broadcast_to_conversation(conversation, event, None).await, 2);
        assert!(phone_rx.recv().await.is_some());
        assert!(laptop_rx.recv().await.is_some());

        assert_eq!(dispatcher.close_conversation(conversation).await, 2);
    }
}
