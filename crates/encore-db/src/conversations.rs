use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use crate::models::{ConversationRow, NewConversation, now_timestamp};
use crate::{Database, OptionalExt};

/// Result of a create call: either a fresh row or an existing 1:1 match.
#[derive(Debug)]
pub struct CreatedConversation {
    pub conversation: ConversationRow,
    pub created: bool,
}

impl Database {
    // -- Conversation directory --

    /// Create a conversation and all of its participant rows atomically.
    ///
    /// Non-group requests first look for an existing 1:1 conversation with the
    /// same pair, inside the same write transaction, and return it unchanged.
    pub fn create_conversation(&self, new: &NewConversation<'_>) -> Result<CreatedConversation> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !new.is_group {
                if let [a, b] = new.participant_ids {
                    if let Some(id) = query_one_to_one(&tx, &a.to_string(), &b.to_string())? {
                        let existing = query_conversation(&tx, &id)?
                            .ok_or_else(|| anyhow::anyhow!("conversation {} vanished", id))?;
                        tx.commit()?;
                        return Ok(CreatedConversation {
                            conversation: existing,
                            created: false,
                        });
                    }
                }
            }

            let id = Uuid::new_v4().to_string();
            let now = now_timestamp();
            tx.execute(
                "INSERT INTO conversations (id, is_group, name, group_image, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![id, new.is_group, new.name, new.group_image, now],
            )?;
            for user_id in new.participant_ids {
                tx.execute(
                    "INSERT INTO participants (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, user_id.to_string(), now],
                )?;
            }

            let conversation = query_conversation(&tx, &id)?
                .ok_or_else(|| anyhow::anyhow!("conversation {} missing after insert", id))?;
            tx.commit()?;

            Ok(CreatedConversation {
                conversation,
                created: true,
            })
        })
    }

    /// Find the non-group conversation whose participant set is exactly {a, b}.
    pub fn find_one_to_one(&self, a: &str, b: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| match query_one_to_one(conn, a, b)? {
            Some(id) => query_conversation(conn, &id),
            None => Ok(None),
        })
    }

    pub fn is_participant(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations the user belongs to, most recently active first.
    pub fn list_conversations_for_user(
        &self,
        user_id: &str,
        skip: u32,
        take: u32,
    ) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id
                 FROM conversations c
                 JOIN participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC, c.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![user_id, take, skip], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(row) = query_conversation(conn, &id)? {
                    rows.push(row);
                }
            }
            Ok(rows)
        })
    }

    /// Every conversation id the user participates in, unpaginated.
    pub fn conversation_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT conversation_id FROM participants WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    /// Overwrite name/image. Fields left as `None` keep their value.
    pub fn update_conversation(
        &self,
        id: &str,
        name: Option<&str>,
        group_image: Option<&str>,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations
                 SET name = COALESCE(?2, name),
                     group_image = COALESCE(?3, group_image),
                     updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, name, group_image, now_timestamp()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_conversation(conn, id)
        })
    }

    /// Delete a conversation; participants, messages and receipts cascade.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Bump the last-activity marker.
    pub fn touch_conversation(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now_timestamp()],
            )?;
            Ok(())
        })
    }
}

fn query_one_to_one(conn: &Connection, a: &str, b: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT c.id
             FROM conversations c
             WHERE c.is_group = 0
               AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = ?1)
               AND EXISTS (SELECT 1 FROM participants WHERE conversation_id = c.id AND user_id = ?2)
               AND (SELECT COUNT(*) FROM participants WHERE conversation_id = c.id) = 2
             ORDER BY c.created_at
             LIMIT 1",
            [a, b],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, is_group, name, group_image, created_at, updated_at
             FROM conversations WHERE id = ?1",
            [id],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    is_group: row.get(1)?,
                    name: row.get(2)?,
                    group_image: row.get(3)?,
                    participant_ids: Vec::new(),
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()?;

    let Some(mut row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM participants WHERE conversation_id = ?1 ORDER BY joined_at, rowid",
    )?;
    row.participant_ids = stmt
        .query_map([id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(Some(row))
}
