use uuid::Uuid;

use encore_types::error::ChatResult;
use encore_types::events::ServerEvent;

use crate::directory::ConversationDirectory;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionId;

/// Stateless typing indicator relay. Each event carries the full state, so
/// the latest one wins on the receiving side.
#[derive(Clone)]
pub struct TypingRelay {
    directory: ConversationDirectory,
    dispatcher: Dispatcher,
}

impl TypingRelay {
    pub fn new(directory: ConversationDirectory, dispatcher: Dispatcher) -> Self {
        Self {
            directory,
            dispatcher,
        }
    }

    /// Broadcast `userTyping` to the room, skipping the originating connection.
    pub async fn relay(
        &self,
        user_id: Uuid,
        origin: ConnectionId,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> ChatResult<usize> {
        self.directory
            .require_participant(user_id, conversation_id)
            .await?;

        let event = ServerEvent::UserTyping {
            user_id,
            conversation_id,
            is_typing,
        };
        Ok(self
            .dispatcher
            .broadcast_to_conversation(conversation_id, event, Some(origin))
            .await)
    }
}
