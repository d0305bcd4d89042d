use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use encore_db::Database;
use encore_types::api::CreateConversationRequest;
use encore_types::error::ChatResult;
use encore_types::events::ServerEvent;

use crate::auth::Authenticator;
use crate::directory::{ConversationDirectory, Created};
use crate::dispatcher::Dispatcher;
use crate::ingest::MessagePipeline;
use crate::receipts::ReadReceipts;
use crate::session::SessionBootstrap;
use crate::typing::TypingRelay;

/// Every chat service wired to one database and one dispatcher.
#[derive(Clone)]
pub struct Chat {
    pub dispatcher: Dispatcher,
    pub directory: ConversationDirectory,
    pub messages: MessagePipeline,
    pub receipts: ReadReceipts,
    pub typing: TypingRelay,
    pub sessions: SessionBootstrap,
}

impl Chat {
    pub fn new(db: Arc<Database>, authenticator: Arc<dyn Authenticator>) -> Self {
        let dispatcher = Dispatcher::new();
        let directory = ConversationDirectory::new(db.clone());
        Self {
            messages: MessagePipeline::new(db.clone(), directory.clone(), dispatcher.clone()),
            receipts: ReadReceipts::new(db, directory.clone(), dispatcher.clone()),
            typing: TypingRelay::new(directory.clone(), dispatcher.clone()),
            sessions: SessionBootstrap::new(authenticator, directory.clone(), dispatcher.clone()),
            directory,
            dispatcher,
        }
    }

    /// Directory `create`, plus live wiring for a freshly inserted row: every
    /// participant's open connections join the room and get told about it.
    pub async fn create_conversation(
        &self,
        creator_id: Uuid,
        req: CreateConversationRequest,
    ) -> ChatResult<Created> {
        let created = self.directory.create(creator_id, req).await?;
        if created.created {
            let conversation = &created.conversation;
            for &user_id in &conversation.participant_ids {
                self.dispatcher
                    .join_user_to_conversation(user_id, conversation.id)
                    .await;
                self.dispatcher
                    .send_to_user(user_id, ServerEvent::ConversationCreated(conversation.clone()))
                    .await;
            }
        }
        Ok(created)
    }

    /// Directory `remove`, then close the room.
    pub async fn remove_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        self.directory.remove(conversation_id, user_id).await?;
        let detached = self.dispatcher.close_conversation(conversation_id).await;
        info!("Room for {} closed ({} connections detached)", conversation_id, detached);
        Ok(())
    }
}
