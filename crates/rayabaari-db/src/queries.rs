use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::warn;

use rayabaari_types::api::NewMessage;
use rayabaari_types::{AttachmentKind, MessageId, MessageRow, PushSubscriptionRow, ReactionRow, RoomRow};

use crate::Database;

const MESSAGE_COLUMNS: &str = "id, room_secret_code, username, content, reply_to_id, image_url, attachment_kind, is_edited, created_at";

impl Database {
    // -- Messages --

    /// Insert a message. Timestamps are strictly increasing so history
    /// cursors never skip a row.
    pub fn insert_message(&self, message: &NewMessage) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let last: Option<i64> =
                conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
            let now = Utc::now().timestamp_micros();
            let created_at = last.map_or(now, |last| now.max(last + 1));

            let (url, kind) = match &message.attachment {
                Some(a) => (Some(a.url.as_str()), Some(a.kind.as_str())),
                None => (None, None),
            };

            conn.execute(
                "INSERT INTO messages (room_secret_code, username, content, reply_to_id, image_url, attachment_kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.room_key,
                    message.author,
                    message.content,
                    message.reply_to.as_ref().map(MessageId::as_str),
                    url,
                    kind,
                    created_at
                ],
            )?;

            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or_else(|| anyhow!("Inserted message {} not found", id))
        })
    }

    /// Newest first, optionally strictly older than `before`, reactions attached.
    pub fn get_messages(
        &self,
        room_key: &str,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut rows = query_messages(conn, room_key, limit, before.map(|t| t.timestamp_micros()))?;

            let ids: Vec<i64> = rows.iter().filter_map(|r| row_id(&r.id)).collect();
            let mut reactions = query_reactions(conn, &ids)?;
            for row in &mut rows {
                if let Some(list) = reactions.remove(row.id.as_str()) {
                    row.reactions = list;
                }
            }

            Ok(rows)
        })
    }

    /// Replace content and set the edited flag. Returns the updated row.
    pub fn update_message_content(&self, id: &MessageId, content: &str) -> Result<Option<MessageRow>> {
        let Some(id) = row_id(id) else {
            return Ok(None);
        };
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?1, is_edited = 1 WHERE id = ?2",
                params![content, id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_message(conn, id)
        })
    }

    /// Delete a message (its reactions go with it). Returns the removed row.
    pub fn delete_message(&self, id: &MessageId) -> Result<Option<MessageRow>> {
        let Some(id) = row_id(id) else {
            return Ok(None);
        };
        self.with_conn(|conn| {
            let Some(row) = query_message(conn, id)? else {
                return Ok(None);
            };
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(Some(row))
        })
    }

    /// Delete every message in a room. Returns the removed ids.
    pub fn delete_room_messages(&self, room_key: &str) -> Result<Vec<MessageId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM messages WHERE room_secret_code = ?1")?;
            let ids = stmt
                .query_map([room_key], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            conn.execute("DELETE FROM messages WHERE room_secret_code = ?1", [room_key])?;
            Ok(ids.into_iter().map(MessageId::from).collect())
        })
    }

    pub fn message_room(&self, id: &MessageId) -> Result<Option<String>> {
        let Some(id) = row_id(id) else {
            return Ok(None);
        };
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room_secret_code FROM messages WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Reactions --

    /// Insert unless the triple exists. Returns whether a row was added.
    pub fn insert_reaction(&self, reaction: &ReactionRow) -> Result<bool> {
        let id = row_id(&reaction.message_id)
            .ok_or_else(|| anyhow!("Invalid message id: {}", reaction.message_id))?;
        self.with_conn(|conn| {
            let added = conn.execute(
                "INSERT INTO message_reactions (message_id, username, emoji) VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, username, emoji) DO NOTHING",
                params![id, reaction.author, reaction.emoji],
            )?;
            Ok(added > 0)
        })
    }

    /// Delete the triple if present. Returns whether a row was removed.
    pub fn delete_reaction(&self, reaction: &ReactionRow) -> Result<bool> {
        let Some(id) = row_id(&reaction.message_id) else {
            return Ok(false);
        };
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND username = ?2 AND emoji = ?3",
                params![id, reaction.author, reaction.emoji],
            )?;
            Ok(removed > 0)
        })
    }

    // -- Rooms --

    pub fn get_rooms(&self) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT room_name, secret_code FROM rooms ORDER BY created_at, room_name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RoomRow {
                        name: row.get(0)?,
                        secret_code: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn insert_room(&self, room: &RoomRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (room_name, secret_code) VALUES (?1, ?2)",
                params![room.name, room.secret_code],
            )?;
            Ok(())
        })
    }

    /// Returns whether a room named `name` existed.
    pub fn update_room(&self, name: &str, room: &RoomRow) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET room_name = ?1, secret_code = ?2 WHERE room_name = ?3",
                params![room.name, room.secret_code, name],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_room(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM rooms WHERE room_name = ?1", [name])?;
            Ok(removed > 0)
        })
    }

    // -- Push subscriptions --

    pub fn insert_push_subscription(&self, username: &str, subscription: &serde_json::Value) -> Result<()> {
        let raw = serde_json::to_string(subscription)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_subscriptions (username, subscription_json) VALUES (?1, ?2)
                 ON CONFLICT(username, subscription_json) DO NOTHING",
                params![username, raw],
            )?;
            Ok(())
        })
    }

    /// Every subscription not registered by `username`.
    pub fn push_subscriptions_except(&self, username: &str) -> Result<Vec<PushSubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, subscription_json FROM push_subscriptions WHERE username != ?1 ORDER BY id",
            )?;
            let raw = stmt
                .query_map([username], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(raw
                .into_iter()
                .filter_map(|(username, json)| match serde_json::from_str(&json) {
                    Ok(subscription) => Some(PushSubscriptionRow { username, subscription }),
                    Err(e) => {
                        warn!("Corrupt push subscription for '{}': {}", username, e);
                        None
                    }
                })
                .collect())
        })
    }
}

fn row_id(id: &MessageId) -> Option<i64> {
    id.as_str().parse().ok()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let id: i64 = row.get(0)?;
    let kind: Option<String> = row.get(6)?;
    let created_at: i64 = row.get(8)?;

    Ok(MessageRow {
        id: MessageId::from(id),
        room_key: row.get(1)?,
        author: row.get(2)?,
        content: row.get(3)?,
        reply_to: row.get::<_, Option<String>>(4)?.map(MessageId::from),
        attachment_url: row.get(5)?,
        attachment_kind: kind.as_deref().and_then(AttachmentKind::parse),
        edited: row.get(7)?,
        created_at: DateTime::from_timestamp_micros(created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message '{}'", created_at, id);
            DateTime::default()
        }),
        reactions: vec![],
    })
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn query_messages(
    conn: &Connection,
    room_key: &str,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE room_secret_code = ?1 AND (?2 IS NULL OR created_at < ?2)
         ORDER BY created_at DESC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![room_key, before, limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch reactions for a set of message ids, grouped by message id.
fn query_reactions(conn: &Connection, ids: &[i64]) -> Result<HashMap<String, Vec<ReactionRow>>> {
    let mut grouped: HashMap<String, Vec<ReactionRow>> = HashMap::new();
    if ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, username, emoji FROM message_reactions WHERE message_id IN ({}) ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok(ReactionRow {
                message_id: MessageId::from(row.get::<_, i64>(0)?),
                author: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for reaction in rows {
        grouped
            .entry(reaction.message_id.to_string())
            .or_default()
            .push(reaction);
    }
    Ok(grouped)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
