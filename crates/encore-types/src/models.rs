use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated caller as produced by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: Uuid,
    pub role: String,
}

/// A 1:1 or group channel with a fixed participant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub group_image: Option<String>,
    pub participant_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Last-activity marker, bumped on every message.
    pub updated_at: DateTime<Utc>,
}

/// A persisted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// Live-connection addressing unit for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn for_conversation(conversation_id: Uuid) -> Self {
        Self(format!("conversation-{}", conversation_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Offset pagination shared by the list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u32,
    pub take: u32,
}

impl Page {
    pub const DEFAULT_TAKE: u32 = 20;
    pub const MAX_TAKE: u32 = 100;

    pub fn new(skip: Option<u32>, take: Option<u32>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            take: take.unwrap_or(Self::DEFAULT_TAKE).clamp(1, Self::MAX_TAKE),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_derived_from_conversation_id() {
        let id = Uuid::nil();
        assert_eq!(
            RoomId::for_conversation(id).as_str(),
            "conversation-00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn page_clamps_take() {
        assert_eq!(Page::new(None, Some(0)).take, 1);
        assert_eq!(Page::new(None, Some(10_000)).take, Page::MAX_TAKE);
        assert_eq!(Page::default(), Page { skip: 0, take: 20 });
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message {
            id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            content: "hello".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("conversationId").is_some());
        assert!(json.get("senderId").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
