//! Database row types. These map directly to SQLite rows and are converted
//! into `encore-types` models at the crate boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use encore_types::models::{Conversation, Message, ReadStatus};

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub group_image: Option<String>,
    pub participant_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReadStatusRow {
    pub message_id: String,
    pub user_id: String,
    pub read_at: String,
}

/// Input for a new conversation. Policy checks happen before this point.
pub struct NewConversation<'a> {
    pub is_group: bool,
    pub name: Option<&'a str>,
    pub group_image: Option<&'a str>,
    pub participant_ids: &'a [Uuid],
}

/// Timestamps are stored fixed-width so string order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("corrupt {} '{}'", what, raw))
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id, "conversation id")?,
            is_group: self.is_group,
            name: self.name,
            group_image: self.group_image,
            participant_ids: self
                .participant_ids
                .iter()
                .map(|id| parse_id(id, "participant id"))
                .collect::<Result<_>>()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            sender_id: parse_id(&self.sender_id, "sender id")?,
            content: self.content,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl ReadStatusRow {
    pub fn into_model(self) -> Result<ReadStatus> {
        Ok(ReadStatus {
            message_id: parse_id(&self.message_id, "message id")?,
            user_id: parse_id(&self.user_id, "user id")?,
            read_at: parse_timestamp(&self.read_at)?,
        })
    }
}
