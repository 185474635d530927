use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::{MessageQuery, NewMessage, PresencePayload};
use crate::events::ChannelEvent;
use crate::models::{MessageId, MessageRow, ReactionRow, RoomRow};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live room channel. Events stop once the subscription is released with
/// [`Backend::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub room_key: String,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// The hosted database/realtime/storage service the client talks to.
///
/// One handle is created at startup and shared (`Arc<dyn Backend>`) for the
/// life of the process.
#[async_trait]
pub trait Backend: Send + Sync {
    // -- Messages --

    /// Newest first, at most `query.limit` rows, reactions joined.
    async fn fetch_messages(&self, query: MessageQuery) -> BackendResult<Vec<MessageRow>>;

    async fn insert_message(&self, message: NewMessage) -> BackendResult<MessageRow>;

    /// Replace a row's content and mark it edited.
    async fn update_message(&self, id: &MessageId, content: String) -> BackendResult<()>;

    /// Returns the deleted row so callers can clean up its attachment.
    async fn delete_message(&self, id: &MessageId) -> BackendResult<MessageRow>;

    /// Delete every message in a room. Returns the number of rows removed.
    async fn delete_room_messages(&self, room_key: &str) -> BackendResult<u64>;

    // -- Reactions --

    /// Insert the triple unless it already exists. Returns whether a row was added.
    async fn insert_reaction(&self, reaction: &ReactionRow) -> BackendResult<bool>;

    /// Delete the triple if present. Returns whether a row was removed.
    async fn delete_reaction(&self, reaction: &ReactionRow) -> BackendResult<bool>;

    // -- Rooms --

    async fn fetch_rooms(&self) -> BackendResult<Vec<RoomRow>>;

    async fn insert_room(&self, room: RoomRow) -> BackendResult<()>;

    /// Update the room currently named `name`.
    async fn update_room(&self, name: &str, room: RoomRow) -> BackendResult<()>;

    async fn delete_room(&self, name: &str) -> BackendResult<()>;

    // -- Storage --

    async fn upload_blob(
        &self,
        bucket: &str,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> BackendResult<()>;

    fn public_url(&self, bucket: &str, file_name: &str) -> String;

    async fn remove_blob(&self, bucket: &str, file_name: &str) -> BackendResult<()>;

    // -- Realtime --

    /// Open a channel for one room: message and reaction changes plus presence.
    async fn subscribe(&self, room_key: &str) -> BackendResult<Subscription>;

    /// Publish presence for a live subscription.
    async fn track(&self, id: SubscriptionId, payload: PresencePayload) -> BackendResult<()>;

    /// Release a subscription and its presence. Safe to call more than once.
    fn unsubscribe(&self, id: SubscriptionId);

    // -- Push --

    async fn register_push(
        &self,
        username: &str,
        subscription: serde_json::Value,
    ) -> BackendResult<()>;
}
