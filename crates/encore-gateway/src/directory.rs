use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use encore_db::Database;
use encore_db::models::NewConversation;
use encore_types::api::{CreateConversationRequest, UpdateConversationRequest};
use encore_types::error::{ChatError, ChatResult};
use encore_types::models::{Conversation, Page};

use crate::blocking;

/// Conversation and membership records. The only authorization primitive for
/// chat operations is [`ConversationDirectory::is_participant`].
#[derive(Clone)]
pub struct ConversationDirectory {
    db: Arc<Database>,
}

/// A conversation returned from `create`, flagged when it was newly inserted.
#[derive(Debug, Clone)]
pub struct Created {
    pub conversation: Conversation,
    pub created: bool,
}

impl ConversationDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a conversation on behalf of `creator_id`, who is always added to
    /// the participant list. A 1:1 request for a pair that already has a
    /// conversation returns the existing one.
    pub async fn create(
        &self,
        creator_id: Uuid,
        req: CreateConversationRequest,
    ) -> ChatResult<Created> {
        let mut participants = Vec::with_capacity(req.participant_ids.len() + 1);
        for id in std::iter::once(creator_id).chain(req.participant_ids) {
            if !participants.contains(&id) {
                participants.push(id);
            }
        }

        if req.is_group {
            if participants.len() < 2 {
                return Err(ChatError::validation(
                    "a group conversation needs at least one other participant",
                ));
            }
        } else {
            if participants.len() != 2 {
                return Err(ChatError::validation(
                    "a one-to-one conversation needs exactly 2 distinct participants",
                ));
            }
            if req.name.is_some() || req.group_image.is_some() {
                return Err(ChatError::validation(
                    "name and image are only allowed on group conversations",
                ));
            }
        }

        let is_group = req.is_group;
        let created = blocking(&self.db, move |db| {
            db.create_conversation(&NewConversation {
                is_group,
                name: req.name.as_deref(),
                group_image: req.group_image.as_deref(),
                participant_ids: &participants,
            })
        })
        .await?;

        let conversation = created.conversation.into_model()?;
        if created.created {
            info!(
                "Conversation {} created by {} ({} participants, group={})",
                conversation.id,
                creator_id,
                conversation.participant_ids.len(),
                conversation.is_group
            );
        }
        Ok(Created {
            conversation,
            created: created.created,
        })
    }

    /// Existing non-group conversation between exactly `a` and `b`.
    pub async fn find_one_to_one(&self, a: Uuid, b: Uuid) -> ChatResult<Option<Conversation>> {
        let row = blocking(&self.db, move |db| {
            db.find_one_to_one(&a.to_string(), &b.to_string())
        })
        .await?;
        Ok(row.map(|r| r.into_model()).transpose()?)
    }

    /// False for unknown conversations; callers map that to their own error.
    pub async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> ChatResult<bool> {
        blocking(&self.db, move |db| {
            db.is_participant(&user_id.to_string(), &conversation_id.to_string())
        })
        .await
    }

    /// Fail with `Forbidden` unless `user_id` belongs to the conversation.
    pub async fn require_participant(&self, user_id: Uuid, conversation_id: Uuid) -> ChatResult<()> {
        if self.is_participant(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(ChatError::forbidden("not a participant of this conversation"))
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid, page: Page) -> ChatResult<Vec<Conversation>> {
        let rows = blocking(&self.db, move |db| {
            db.list_conversations_for_user(&user_id.to_string(), page.skip, page.take)
        })
        .await?;
        rows.into_iter()
            .map(|r| r.into_model().map_err(ChatError::from))
            .collect()
    }

    /// Conversation ids for room joins at connect time.
    pub async fn conversation_ids_for_user(&self, user_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let ids = blocking(&self.db, move |db| db.conversation_ids_for_user(&user_id.to_string()))
            .await?;
        ids.iter()
            .map(|id| {
                id.parse::<Uuid>()
                    .map_err(|e| ChatError::from(anyhow::anyhow!("corrupt conversation id '{}': {}", id, e)))
            })
            .collect()
    }

    /// `NotFound` if missing, `Forbidden` if the caller is not a participant.
    pub async fn get(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<Conversation> {
        let row = blocking(&self.db, move |db| db.get_conversation(&conversation_id.to_string()))
            .await?
            .ok_or_else(|| ChatError::not_found(format!("conversation {}", conversation_id)))?;
        let conversation = row.into_model()?;
        if !conversation.participant_ids.contains(&user_id) {
            return Err(ChatError::forbidden("not a participant of this conversation"));
        }
        Ok(conversation)
    }

    /// Rename or re-image a group conversation.
    pub async fn update(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        req: UpdateConversationRequest,
    ) -> ChatResult<Conversation> {
        let existing = self.get(conversation_id, user_id).await?;
        ensure_group(&existing)?;

        let row = blocking(&self.db, move |db| {
            db.update_conversation(
                &conversation_id.to_string(),
                req.name.as_deref(),
                req.group_image.as_deref(),
            )
        })
        .await?
        .ok_or_else(|| ChatError::not_found(format!("conversation {}", conversation_id)))?;
        Ok(row.into_model()?)
    }

    /// Delete a group conversation together with its history.
    pub async fn remove(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        let existing = self.get(conversation_id, user_id).await?;
        ensure_group(&existing)?;

        let deleted =
            blocking(&self.db, move |db| db.delete_conversation(&conversation_id.to_string())).await?;
        if !deleted {
            return Err(ChatError::not_found(format!("conversation {}", conversation_id)));
        }
        info!("Conversation {} deleted by {}", conversation_id, user_id);
        Ok(())
    }

    /// Bump last activity. Failures are logged and swallowed.
    pub async fn touch(&self, conversation_id: Uuid) {
        let result =
            blocking(&self.db, move |db| db.touch_conversation(&conversation_id.to_string())).await;
        if let Err(e) = result {
            warn!("Failed to touch conversation {}: {}", conversation_id, e);
        }
    }
}

fn ensure_group(conversation: &Conversation) -> ChatResult<()> {
    if conversation.is_group {
        Ok(())
    } else {
        Err(ChatError::forbidden("only group conversations can be modified"))
    }
}
