use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::models::{MessageRow, ReadStatusRow, format_timestamp, now_timestamp};
use crate::retry::with_conflict_retry;
use crate::{Database, OptionalExt};

/// Outcome of `create_message`: the stored row and whether this call
/// inserted it (false when an earlier identical send was returned).
#[derive(Debug)]
pub struct CreatedMessage {
    pub message: MessageRow,
    pub created: bool,
}

impl Database {
    // -- Messages --

    /// Most recent message with the same (conversation, sender, content)
    /// created within the trailing `window`.
    pub fn find_recent_duplicate(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        window: Duration,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            query_recent_duplicate(conn, conversation_id, sender_id, content, window)
        })
    }

    /// Persist a message, or return the duplicate already stored within the
    /// dedup window.
    ///
    /// The duplicate check and the insert run in one immediate transaction; a
    /// busy/locked database re-runs the whole unit under the retry policy. The
    /// connection lock is released while backing off.
    pub fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<CreatedMessage> {
        let config = self.config().clone();
        with_conflict_retry(&config.retry, |attempt| {
            self.with_conn_mut(|conn| {
                create_message_tx(
                    conn,
                    conversation_id,
                    sender_id,
                    content,
                    config.dedup_window,
                    config.tx_timeout,
                )
                .with_context(|| format!("create_message attempt {}", attempt))
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, conversation_id, sender_id, content, created_at
                 FROM messages WHERE id = ?1",
                [id],
                map_message,
            )
            .optional()
        })
    }

    /// Message history, newest first.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        skip: u32,
        take: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, take, skip], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Read statuses --

    /// Insert-or-return for (message, user). An existing row is never touched,
    /// so `read_at` keeps the time of the first call.
    pub fn create_read_status(&self, message_id: &str, user_id: &str) -> Result<ReadStatusRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO read_statuses (message_id, user_id, read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, user_id) DO NOTHING",
                rusqlite::params![message_id, user_id, now_timestamp()],
            )?;
            query_read_status(conn, message_id, user_id)?
                .ok_or_else(|| anyhow::anyhow!("read status for {} missing after upsert", message_id))
        })
    }

    pub fn get_read_status(&self, message_id: &str, user_id: &str) -> Result<Option<ReadStatusRow>> {
        self.with_conn(|conn| query_read_status(conn, message_id, user_id))
    }
}

fn create_message_tx(
    conn: &mut Connection,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    window: Duration,
    timeout: Duration,
) -> Result<CreatedMessage> {
    let started = Instant::now();
    // Dropping the transaction on any early return rolls it back.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = query_recent_duplicate(&tx, conversation_id, sender_id, content, window)? {
        debug!(
            "Duplicate send collapsed onto message {} in conversation {}",
            existing.id, conversation_id
        );
        tx.commit()?;
        return Ok(CreatedMessage {
            message: existing,
            created: false,
        });
    }

    let row = MessageRow {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        created_at: now_timestamp(),
    };
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![row.id, row.conversation_id, row.sender_id, row.content, row.created_at],
    )?;

    if started.elapsed() > timeout {
        bail!("create_message transaction exceeded {:?}, rolled back", timeout);
    }
    tx.commit()?;
    Ok(CreatedMessage {
        message: row,
        created: true,
    })
}

fn query_recent_duplicate(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    window: Duration,
) -> Result<Option<MessageRow>> {
    let window = chrono::Duration::from_std(window).context("dedup window out of range")?;
    let cutoff = format_timestamp(Utc::now() - window);

    conn.query_row(
        "SELECT id, conversation_id, sender_id, content, created_at
         FROM messages
         WHERE conversation_id = ?1 AND sender_id = ?2 AND content = ?3 AND created_at >= ?4
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1",
        rusqlite::params![conversation_id, sender_id, content, cutoff],
        map_message,
    )
    .optional()
}

fn query_read_status(
    conn: &Connection,
    message_id: &str,
    user_id: &str,
) -> Result<Option<ReadStatusRow>> {
    conn.query_row(
        "SELECT message_id, user_id, read_at FROM read_statuses
         WHERE message_id = ?1 AND user_id = ?2",
        [message_id, user_id],
        |row| {
            Ok(ReadStatusRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                read_at: row.get(2)?,
            })
        },
    )
    .optional()
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}
