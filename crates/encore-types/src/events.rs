use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message};

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Post a message to a conversation
    SendMessage { content: String, conversation_id: Uuid },

    /// Mark a message as read by the caller
    MarkMessageRead { message_id: Uuid },

    /// Typing indicator, replaced on every event
    Typing { conversation_id: Uuid, is_typing: bool },
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// A message was persisted in one of the caller's conversations
    NewMessage(Message),

    /// A participant read a message
    MessageRead {
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// A participant started or stopped typing
    UserTyping {
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// The caller was added to a newly created conversation
    ConversationCreated(Conversation),

    /// A command from this connection failed
    Error { message: String },
}

impl ServerEvent {
    /// Wire name of the event, as it appears in the `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::MessageRead { .. } => "messageRead",
            Self::UserTyping { .. } => "userTyping",
            Self::ConversationCreated(_) => "conversationCreated",
            Self::Error { .. } => "error",
        }
    }
}
