use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use rayabaari_db::Database;
use rayabaari_types::api::{MessageQuery, NewMessage, PresencePayload};
use rayabaari_types::events::{ChannelEvent, MessageChange, ReactionChange};
use rayabaari_types::{
    Backend, BackendError, BackendResult, MessageId, MessageRow, ReactionRow, RoomRow, Subscription,
    SubscriptionId,
};

use crate::dispatcher::Dispatcher;
use crate::storage::BlobStore;

/// A self-hosted stand-in for the managed service: SQLite rows, on-disk
/// blobs and an in-process realtime dispatcher.
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    blobs: BlobStore,
}

impl LocalBackend {
    pub fn new(db: Database, blobs: BlobStore) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            blobs,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Run a blocking DB call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                BackendError::Unavailable(e.to_string())
            })?
            .map_err(|e| BackendError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    // -- Messages --

    async fn fetch_messages(&self, query: MessageQuery) -> BackendResult<Vec<MessageRow>> {
        let limit = query.limit.min(200);
        self.blocking(move |db| db.get_messages(&query.room_key, limit, query.before))
            .await
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<MessageRow> {
        if message.room_key.is_empty() || message.author.is_empty() {
            return Err(BackendError::Rejected("room and author are required".into()));
        }
        let row = self.blocking(move |db| db.insert_message(&message)).await?;
        self.dispatcher.publish_insert(&row);
        Ok(row)
    }

    async fn update_message(&self, id: &MessageId, content: String) -> BackendResult<()> {
        let target = id.clone();
        let row = self
            .blocking(move |db| db.update_message_content(&target, &content))
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("message {}", id)))?;

        let room = row.room_key.clone();
        self.dispatcher
            .publish(&room, ChannelEvent::Message(MessageChange::Update(row)));
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> BackendResult<MessageRow> {
        let target = id.clone();
        let row = self
            .blocking(move |db| db.delete_message(&target))
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("message {}", id)))?;

        self.dispatcher.publish(
            &row.room_key,
            ChannelEvent::Message(MessageChange::Delete { id: row.id.clone() }),
        );
        Ok(row)
    }

    async fn delete_room_messages(&self, room_key: &str) -> BackendResult<u64> {
        let room = room_key.to_string();
        let ids = self.blocking(move |db| db.delete_room_messages(&room)).await?;

        info!("Cleared {} messages from a room", ids.len());
        let count = ids.len() as u64;
        for id in ids {
            self.dispatcher
                .publish(room_key, ChannelEvent::Message(MessageChange::Delete { id }));
        }
        Ok(count)
    }

    // -- Reactions --

    async fn insert_reaction(&self, reaction: &ReactionRow) -> BackendResult<bool> {
        let row = reaction.clone();
        let (added, room) = self
            .blocking(move |db| {
                let added = db.insert_reaction(&row)?;
                let room = if added { db.message_room(&row.message_id)? } else { None };
                Ok((added, room))
            })
            .await?;

        if let Some(room) = room {
            self.dispatcher
                .publish(&room, ChannelEvent::Reaction(ReactionChange::Insert(reaction.clone())));
        }
        Ok(added)
    }

    async fn delete_reaction(&self, reaction: &ReactionRow) -> BackendResult<bool> {
        let row = reaction.clone();
        let (removed, room) = self
            .blocking(move |db| {
                let room = db.message_room(&row.message_id)?;
                let removed = db.delete_reaction(&row)?;
                Ok((removed, room))
            })
            .await?;

        if let (true, Some(room)) = (removed, room) {
            self.dispatcher
                .publish(&room, ChannelEvent::Reaction(ReactionChange::Delete(reaction.clone())));
        }
        Ok(removed)
    }

    // -- Rooms --

    async fn fetch_rooms(&self) -> BackendResult<Vec<RoomRow>> {
        self.blocking(|db| db.get_rooms()).await
    }

    async fn insert_room(&self, room: RoomRow) -> BackendResult<()> {
        self.blocking(move |db| db.insert_room(&room)).await
    }

    async fn update_room(&self, name: &str, room: RoomRow) -> BackendResult<()> {
        let current = name.to_string();
        let found = self.blocking(move |db| db.update_room(&current, &room)).await?;
        if !found {
            return Err(BackendError::NotFound(format!("room {}", name)));
        }
        Ok(())
    }

    async fn delete_room(&self, name: &str) -> BackendResult<()> {
        let current = name.to_string();
        let found = self.blocking(move |db| db.delete_room(&current)).await?;
        if !found {
            return Err(BackendError::NotFound(format!("room {}", name)));
        }
        Ok(())
    }

    // -- Storage --

    async fn upload_blob(
        &self,
        bucket: &str,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<()> {
        info!("Uploading {} ({}, {} bytes) to {}", file_name, mime, bytes.len(), bucket);
        self.blobs
            .put(bucket, file_name, &bytes)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))
    }

    fn public_url(&self, bucket: &str, file_name: &str) -> String {
        self.blobs.public_url(bucket, file_name)
    }

    async fn remove_blob(&self, bucket: &str, file_name: &str) -> BackendResult<()> {
        self.blobs
            .remove(bucket, file_name)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))
    }

    // -- Realtime --

    async fn subscribe(&self, room_key: &str) -> BackendResult<Subscription> {
        let (id, events) = self.dispatcher.subscribe(room_key);
        Ok(Subscription {
            id,
            room_key: room_key.to_string(),
            events,
        })
    }

    async fn track(&self, id: SubscriptionId, payload: PresencePayload) -> BackendResult<()> {
        if !self.dispatcher.track(id, payload) {
            warn!("Presence for unknown subscription {}", id);
            return Err(BackendError::NotFound(format!("subscription {}", id)));
        }
        Ok(())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.dispatcher.unsubscribe(id);
    }

    // -- Push --

    async fn register_push(
        &self,
        username: &str,
        subscription: serde_json::Value,
    ) -> BackendResult<()> {
        let username = username.to_string();
        self.blocking(move |db| db.insert_push_subscription(&username, &subscription))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path(), "http://localhost:3000");
        (dir, LocalBackend::new(Database::open_in_memory().unwrap(), blobs))
    }

    fn new_message(room: &str, content: &str) -> NewMessage {
        NewMessage {
            author: "asha".into(),
            content: content.into(),
            room_key: room.into(),
            reply_to: None,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn insert_is_echoed_to_room() {
        let (_dir, backend) = backend();
        let mut sub = backend.subscribe("alpha").await.unwrap();
        assert_eq!(sub.events.recv().await, Some(ChannelEvent::Subscribed));
        assert!(matches!(sub.events.recv().await, Some(ChannelEvent::PresenceSync(_))));

        let row = backend.insert_message(new_message("alpha", "c1")).await.unwrap();
        assert_eq!(
            sub.events.recv().await,
            Some(ChannelEvent::Message(MessageChange::Insert(row)))
        );
    }

    #[tokio::test]
    async fn delete_returns_the_removed_row() {
        let (_dir, backend) = backend();
        let row = backend.insert_message(new_message("alpha", "c1")).await.unwrap();
        assert_eq!(backend.delete_message(&row.id).await.unwrap(), row);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let (_dir, backend) = backend();
        let id = MessageId::from(404);
        assert!(matches!(backend.delete_message(&id).await, Err(BackendError::NotFound(_))));
        assert!(matches!(
            backend.update_message(&id, "x".into()).await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(backend.delete_room("nope").await, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn reaction_on_missing_message_is_rejected() {
        let (_dir, backend) = backend();
        let reaction = ReactionRow::new(MessageId::from(404), "asha", "👍");
        assert!(matches!(
            backend.insert_reaction(&reaction).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn inserts_feed_reaches_hooks() {
        let (_dir, backend) = backend();
        let mut inserts = backend.dispatcher().subscribe_inserts();
        backend.insert_message(new_message("beta", "c2")).await.unwrap();
        assert_eq!(inserts.recv().await.unwrap().room_key, "beta");
    }
}
