//! Message ingestion: validate, persist with dedup, then fan out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error};
use uuid::Uuid;

use encore_db::Database;
use encore_types::error::{ChatError, ChatResult};
use encore_types::events::ServerEvent;
use encore_types::models::{Message, Page};

use crate::blocking;
use crate::directory::ConversationDirectory;
use crate::dispatcher::Dispatcher;

/// Where a send currently is. Used for diagnostics on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Validating,
    Persisting,
}

/// Per-conversation turn lock: persist and broadcast happen under it, so
/// fan-out order matches commit order within a conversation.
#[derive(Default)]
struct Sequencer {
    turns: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Sequencer {
    async fn turn(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
            turns.retain(|_, m| Arc::strong_count(m) > 1);
            turns.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct MessagePipeline {
    db: Arc<Database>,
    directory: ConversationDirectory,
    dispatcher: Dispatcher,
    sequencer: Arc<Sequencer>,
}

impl MessagePipeline {
    pub fn new(db: Arc<Database>, directory: ConversationDirectory, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            directory,
            dispatcher,
            sequencer: Arc::new(Sequencer::default()),
        }
    }

    /// Send `content` from `sender_id` into a conversation.
    ///
    /// Idempotent within the dedup window: a resend returns the stored message
    /// and is not broadcast again. Callers cannot tell the two cases apart.
    pub async fn send(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: String,
    ) -> ChatResult<Message> {
        self.run(sender_id, conversation_id, content)
            .await
            .map_err(|(stage, e)| {
                match &e {
                    ChatError::Internal(inner) => error!(
                        "sendMessage from {} to {} failed while {:?}: {:#}",
                        sender_id, conversation_id, stage, inner
                    ),
                    other => debug!(
                        "sendMessage from {} to {} rejected while {:?}: {}",
                        sender_id, conversation_id, stage, other
                    ),
                }
                e
            })
    }

    async fn run(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: String,
    ) -> Result<Message, (SendStage, ChatError)> {
        let at = |stage: SendStage| move |e: ChatError| (stage, e);

        if content.trim().is_empty() {
            return Err((
                SendStage::Validating,
                ChatError::validation("message content must not be empty"),
            ));
        }
        self.directory
            .require_participant(sender_id, conversation_id)
            .await
            .map_err(at(SendStage::Validating))?;

        let _turn = self.sequencer.turn(conversation_id).await;

        let stored = blocking(&self.db, move |db| {
            db.create_message(&conversation_id.to_string(), &sender_id.to_string(), &content)
        })
        .await
        .map_err(at(SendStage::Persisting))?;
        let created = stored.created;
        let message = stored
            .message
            .into_model()
            .map_err(|e| (SendStage::Persisting, ChatError::from(e)))?;

        if !created {
            debug!("Duplicate send of message {} suppressed", message.id);
            return Ok(message);
        }

        self.directory.touch(conversation_id).await;
        let delivered = self
            .dispatcher
            .broadcast_to_conversation(conversation_id, ServerEvent::NewMessage(message.clone()), None)
            .await;
        debug!(
            "Message {} in {} fanned out to {} connections",
            message.id, conversation_id, delivered
        );

        Ok(message)
    }

    /// Conversation history, newest first. Participants only.
    pub async fn history(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        page: Page,
    ) -> ChatResult<Vec<Message>> {
        // Resolves NotFound vs Forbidden.
        self.directory.get(conversation_id, user_id).await?;

        let rows = blocking(&self.db, move |db| {
            db.list_messages(&conversation_id.to_string(), page.skip, page.take)
        })
        .await?;
        rows.into_iter()
            .map(|r| r.into_model().map_err(ChatError::from))
            .collect()
    }

    /// Single message, visible to participants of its conversation.
    pub async fn get(&self, message_id: Uuid, user_id: Uuid) -> ChatResult<Message> {
        let message = load_message(&self.db, message_id).await?;
        self.directory
            .require_participant(user_id, message.conversation_id)
            .await?;
        Ok(message)
    }
}

pub(crate) async fn load_message(db: &Arc<Database>, message_id: Uuid) -> ChatResult<Message> {
    let row = blocking(db, move |db| db.get_message(&message_id.to_string()))
        .await?
        .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))?;
    Ok(row.into_model()?)
}
