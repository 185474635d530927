use std::sync::Arc;

use tracing::{error, info, warn};

use rayabaari_crypto::{Codec, UNREADABLE};
use rayabaari_types::{Backend, RoomRow};

use crate::error::{ChatError, ChatResult};

/// A room with its secret code revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub secret_code: String,
}

/// A successful login: who the user is and which room key they joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub room_name: String,
    pub room_key: String,
}

/// Room administration and secret-code login.
///
/// Secret codes are encrypted at rest. Rows written before that still hold the
/// code in plaintext and are accepted as-is.
#[derive(Clone)]
pub struct RoomDirectory {
    backend: Arc<dyn Backend>,
    codec: Arc<Codec>,
}

impl RoomDirectory {
    pub fn new(backend: Arc<dyn Backend>, codec: Arc<Codec>) -> Self {
        Self { backend, codec }
    }

    pub async fn list(&self) -> ChatResult<Vec<Room>> {
        let rows = self.backend.fetch_rooms().await.map_err(|e| {
            error!("Fetching rooms failed: {}", e);
            ChatError::Fetch(e)
        })?;
        Ok(rows
            .into_iter()
            .map(|row| Room {
                secret_code: self.reveal(&row.secret_code),
                name: row.name,
            })
            .collect())
    }

    pub async fn create(&self, name: &str, secret_code: &str) -> ChatResult<()> {
        let row = self.seal(name, secret_code)?;
        self.backend.insert_room(row).await.map_err(mutation)?;
        info!("Created room {}", name.trim());
        Ok(())
    }

    /// Rename a room and/or change its code. Messages stay keyed by the old
    /// code.
    pub async fn update(&self, current_name: &str, name: &str, secret_code: &str) -> ChatResult<()> {
        let row = self.seal(name, secret_code)?;
        self.backend
            .update_room(current_name, row)
            .await
            .map_err(mutation)?;
        info!("Updated room {}", current_name);
        Ok(())
    }

    /// Delete a room's messages, then the room itself. Returns how many
    /// messages were removed.
    pub async fn delete(&self, room: &Room) -> ChatResult<u64> {
        let removed = self
            .backend
            .delete_room_messages(&room.secret_code)
            .await
            .map_err(mutation)?;
        self.backend.delete_room(&room.name).await.map_err(mutation)?;
        info!("Deleted room {} and {} messages", room.name, removed);
        Ok(removed)
    }

    /// Join the room whose code matches.
    pub async fn login(&self, username: &str, secret_code: &str) -> ChatResult<Login> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::Missing("display name"));
        }
        if secret_code.is_empty() {
            return Err(ChatError::InvalidSecretCode);
        }

        let rooms = self.list().await?;
        let Some(room) = rooms.into_iter().find(|r| r.secret_code == secret_code) else {
            warn!("Login attempt with an unknown secret code");
            return Err(ChatError::InvalidSecretCode);
        };

        info!("{} joined {}", username, room.name);
        Ok(Login {
            username: username.to_string(),
            room_name: room.name,
            room_key: room.secret_code,
        })
    }

    fn seal(&self, name: &str, secret_code: &str) -> ChatResult<RoomRow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Missing("room name"));
        }
        if secret_code.is_empty() {
            return Err(ChatError::Missing("secret code"));
        }
        let secret_code = self
            .codec
            .encrypt(secret_code)
            .map_err(|e| ChatError::Encrypt(e.to_string()))?;
        Ok(RoomRow {
            name: name.to_string(),
            secret_code,
        })
    }

    /// Decrypt a stored code, falling back to the stored text for legacy rows.
    fn reveal(&self, stored: &str) -> String {
        let code = self.codec.decrypt(stored);
        if code == UNREADABLE {
            stored.to_string()
        } else {
            code
        }
    }
}

fn mutation(e: rayabaari_types::BackendError) -> ChatError {
    error!("Room update failed: {}", e);
    ChatError::Mutation(e)
}
