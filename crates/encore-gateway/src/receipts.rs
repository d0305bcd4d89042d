use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use encore_db::Database;
use encore_types::error::ChatResult;
use encore_types::events::ServerEvent;
use encore_types::models::ReadStatus;

use crate::blocking;
use crate::directory::ConversationDirectory;
use crate::dispatcher::Dispatcher;
use crate::ingest::load_message;

#[derive(Clone)]
pub struct ReadReceipts {
    db: Arc<Database>,
    directory: ConversationDirectory,
    dispatcher: Dispatcher,
}

impl ReadReceipts {
    pub fn new(db: Arc<Database>, directory: ConversationDirectory, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            directory,
            dispatcher,
        }
    }

    /// Record that `user_id` read a message and tell the conversation room.
    /// Repeat calls return the original `read_at`.
    pub async fn mark_as_read(&self, message_id: Uuid, user_id: Uuid) -> ChatResult<ReadStatus> {
        let message = load_message(&self.db, message_id).await?;
        self.directory
            .require_participant(user_id, message.conversation_id)
            .await?;

        let row = blocking(&self.db, move |db| {
            db.create_read_status(&message_id.to_string(), &user_id.to_string())
        })
        .await?;
        let status = row.into_model()?;

        let delivered = self
            .dispatcher
            .broadcast_to_conversation(
                message.conversation_id,
                ServerEvent::MessageRead {
                    message_id,
                    user_id,
                    read_at: status.read_at,
                },
                None,
            )
            .await;
        debug!(
            "Message {} read by {} ({} connections notified)",
            message_id, user_id, delivered
        );

        Ok(status)
    }

    /// Read-only lookup; `None` until the user has marked the message read.
    pub async fn get_read_status(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> ChatResult<Option<ReadStatus>> {
        let message = load_message(&self.db, message_id).await?;
        self.directory
            .require_participant(user_id, message.conversation_id)
            .await?;

        let row = blocking(&self.db, move |db| {
            db.get_read_status(&message_id.to_string(), &user_id.to_string())
        })
        .await?;
        Ok(row.map(|r| r.into_model()).transpose()?)
    }
}
