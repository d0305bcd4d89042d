use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use encore_types::error::{ChatError, ChatResult};
use encore_types::events::ServerEvent;
use encore_types::models::Principal;

use crate::auth::Authenticator;
use crate::directory::ConversationDirectory;
use crate::dispatcher::Dispatcher;
use crate::registry::{ConnectionHandle, ConnectionId};

/// A registered connection, joined to all of its principal's rooms.
pub struct Session {
    pub principal: Principal,
    pub handle: ConnectionHandle,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Turns a handshake token into a live, room-joined connection.
#[derive(Clone)]
pub struct SessionBootstrap {
    authenticator: Arc<dyn Authenticator>,
    directory: ConversationDirectory,
    dispatcher: Dispatcher,
}

impl SessionBootstrap {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        directory: ConversationDirectory,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            authenticator,
            directory,
            dispatcher,
        }
    }

    /// Verify the handshake token. Nothing is registered on failure.
    pub fn authenticate(&self, token: Option<&str>) -> ChatResult<Principal> {
        let token = token.ok_or(ChatError::Unauthorized)?;
        self.authenticator.verify(token)
    }

    /// Register a connection for `principal` and join it to the room of every
    /// conversation they belong to.
    ///
    /// Registration happens before the membership lookup so a conversation
    /// created in between is joined by the creation path instead of missed.
    pub async fn open(&self, principal: Principal) -> ChatResult<Session> {
        let (handle, events) = self.dispatcher.connect(principal.user_id).await;

        let conversation_ids = match self
            .directory
            .conversation_ids_for_user(principal.user_id)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    "Session bootstrap for {} failed, dropping connection {}: {}",
                    principal.user_id,
                    handle.id(),
                    e
                );
                self.dispatcher.disconnect(handle.id()).await;
                return Err(e);
            }
        };

        for conversation_id in &conversation_ids {
            self.dispatcher.join_conversation(&handle, *conversation_id).await;
        }

        info!(
            "User {} connected as {} ({} rooms)",
            principal.user_id,
            handle.id(),
            conversation_ids.len()
        );
        Ok(Session {
            principal,
            handle,
            events,
        })
    }

    /// Unregister a connection and leave all of its rooms.
    pub async fn close(&self, conn_id: ConnectionId) {
        self.dispatcher.disconnect(conn_id).await;
    }
}
