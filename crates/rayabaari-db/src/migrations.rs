use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            room_name   TEXT PRIMARY KEY,
            secret_code TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- created_at is unix microseconds; strictly increasing per insert
        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            room_secret_code TEXT NOT NULL,
            username         TEXT NOT NULL,
            content          TEXT NOT NULL DEFAULT '',
            reply_to_id      TEXT,
            image_url        TEXT,
            attachment_kind  TEXT,
            is_edited        INTEGER NOT NULL DEFAULT 0,
            created_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_secret_code, created_at);

        CREATE TABLE IF NOT EXISTS message_reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            username    TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            UNIQUE(message_id, username, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);

        CREATE TABLE IF NOT EXISTS push_subscriptions (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            username          TEXT NOT NULL,
            subscription_json TEXT NOT NULL,
            UNIQUE(username, subscription_json)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
