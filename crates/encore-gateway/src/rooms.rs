use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, trace};

use encore_types::events::ServerEvent;
use encore_types::models::RoomId;

use crate::registry::{ConnectionHandle, ConnectionId};

/// Named rooms of live connections with fan-out send.
///
/// Recipients are copied out under the read lock and sent to after it is
/// released, so joins and leaves never block on a slow broadcast.
#[derive(Default)]
pub struct RoomBroadcaster {
    inner: RwLock<RoomsInner>,
}

#[derive(Default)]
struct RoomsInner {
    rooms: HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Joining twice is harmless.
    pub async fn join(&self, handle: &ConnectionHandle, room: RoomId) {
        let mut inner = self.inner.write().await;
        inner
            .memberships
            .entry(handle.id())
            .or_default()
            .insert(room.clone());
        trace!("Connection {} joined {}", handle.id(), room);
        inner
            .rooms
            .entry(room)
            .or_default()
            .insert(handle.id(), handle.clone());
    }

    pub async fn leave(&self, conn_id: ConnectionId, room: &RoomId) {
        let mut inner = self.inner.write().await;
        if let Some(rooms) = inner.memberships.get_mut(&conn_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                inner.memberships.remove(&conn_id);
            }
        }
        remove_member(&mut inner.rooms, room, conn_id);
    }

    /// Detach a connection from every room it joined. Returns how many.
    pub async fn leave_all(&self, conn_id: ConnectionId) -> usize {
        let mut inner = self.inner.write().await;
        let Some(rooms) = inner.memberships.remove(&conn_id) else {
            return 0;
        };
        for room in &rooms {
            remove_member(&mut inner.rooms, room, conn_id);
        }
        debug!("Connection {} left {} rooms", conn_id, rooms.len());
        rooms.len()
    }

    /// Drop a room and detach all of its members. Returns the member count.
    pub async fn close_room(&self, room: &RoomId) -> usize {
        let mut inner = self.inner.write().await;
        let Some(members) = inner.rooms.remove(room) else {
            return 0;
        };
        for conn_id in members.keys() {
            if let Some(rooms) = inner.memberships.get_mut(conn_id) {
                rooms.remove(room);
                if rooms.is_empty() {
                    inner.memberships.remove(conn_id);
                }
            }
        }
        debug!("Closed {} ({} members)", room, members.len());
        members.len()
    }

    /// Deliver `event` to every connection in `room`, optionally skipping one.
    /// Returns the number of connections that accepted it.
    pub async fn broadcast_to_room(
        &self,
        room: &RoomId,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let recipients: Vec<ConnectionHandle> = {
            let inner = self.inner.read().await;
            match inner.rooms.get(room) {
                Some(members) => members
                    .values()
                    .filter(|h| Some(h.id()) != except)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let delivered = recipients.iter().filter(|h| h.send(event.clone())).count();
        trace!("{} -> {} ({} connections)", event.name(), room, delivered);
        delivered
    }

    pub async fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        self.inner
            .read()
            .await
            .memberships
            .get(&conn_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn remove_member(
    rooms: &mut HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
    room: &RoomId,
    conn_id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}
