use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rayabaari_crypto::Codec;
use rayabaari_types::api::PresencePayload;
use rayabaari_types::events::ChannelEvent;
use rayabaari_types::{Backend, MessageId, SubscriptionId};

use crate::attachments::{self, Upload};
use crate::error::{ChatError, ChatResult};
use crate::presence::PresenceTracker;
use crate::reactions::{ReactionAggregator, Toggle};
use crate::search::SearchIndex;
use crate::store::{Applied, LoadOutcome, MessageStore};

/// What the composer will do with the next submit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Composer {
    pub reply_to: Option<MessageId>,
    pub editing: Option<MessageId>,
}

impl Composer {
    pub fn reply(&mut self, id: MessageId) {
        self.editing = None;
        self.reply_to = Some(id);
    }

    pub fn edit(&mut self, id: MessageId) {
        self.reply_to = None;
        self.editing = Some(id);
    }

    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    /// Drop any intent that points at a removed message.
    fn forget(&mut self, id: &MessageId) -> bool {
        let mut dropped = false;
        if self.reply_to.as_ref() == Some(id) {
            self.reply_to = None;
            dropped = true;
        }
        if self.editing.as_ref() == Some(id) {
            self.editing = None;
            dropped = true;
        }
        dropped
    }
}

/// Outcome of handling one channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The channel is live and our presence is published.
    Live,
    Messages(Applied),
    Presence { online: usize },
}

/// One user in one room: the message store bound to the room's live channel.
///
/// Dropping the session releases the channel subscription.
pub struct RoomSession {
    backend: Arc<dyn Backend>,
    codec: Arc<Codec>,
    store: MessageStore,
    reactions: ReactionAggregator,
    presence: PresenceTracker,
    search: SearchIndex,
    composer: Composer,
    subscription: Option<SubscriptionId>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl RoomSession {
    /// Subscribe to the room, then load its newest page.
    pub async fn open(
        backend: Arc<dyn Backend>,
        codec: Arc<Codec>,
        user: &str,
        room_key: &str,
    ) -> ChatResult<Self> {
        let subscription = backend.subscribe(room_key).await.map_err(|e| {
            warn!("Subscribing to room failed: {}", e);
            ChatError::Subscribe(e)
        })?;
        info!("{} opened a room session ({})", user, subscription.id);

        let session = Self {
            store: MessageStore::new(backend.clone(), codec.clone(), room_key, user),
            reactions: ReactionAggregator::new(backend.clone()),
            presence: PresenceTracker::new(),
            search: SearchIndex::new(),
            composer: Composer::default(),
            subscription: Some(subscription.id),
            events: subscription.events,
            backend,
            codec,
        };

        session.store.load_initial().await?;
        Ok(session)
    }

    /// Leave this room and open another with the same identity.
    pub async fn switch(self, room_key: &str) -> ChatResult<Self> {
        let backend = self.backend.clone();
        let codec = self.codec.clone();
        let user = self.store.user().to_string();
        drop(self);
        Self::open(backend, codec, &user, room_key).await
    }

    /// Leave the room. Same as dropping the session.
    pub fn close(self) {
        drop(self);
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn user(&self) -> &str {
        self.store.user()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn search(&self) -> &SearchIndex {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut SearchIndex {
        &mut self.search
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    /// Quote a loaded message in the next send.
    pub fn start_reply(&mut self, id: &MessageId) -> ChatResult<()> {
        self.loaded(id)?;
        self.composer.reply(id.clone());
        Ok(())
    }

    /// Turn the next submit into an edit of a loaded message.
    pub fn start_edit(&mut self, id: &MessageId) -> ChatResult<()> {
        self.loaded(id)?;
        self.composer.edit(id.clone());
        Ok(())
    }

    pub fn set_search_query(&mut self, query: &str) {
        let snapshot = self.store.snapshot();
        self.search.set_query(query, &snapshot);
    }

    /// Wait for the next channel event and apply it.
    pub async fn next_update(&mut self) -> ChatResult<SessionUpdate> {
        let event = self.events.recv().await.ok_or(ChatError::ChannelClosed)?;
        Ok(self.handle(event).await)
    }

    pub async fn handle(&mut self, event: ChannelEvent) -> SessionUpdate {
        debug!("Channel event: {}", event.label());
        match event {
            ChannelEvent::Subscribed => {
                if let Some(id) = self.subscription {
                    let payload = PresencePayload::now(self.store.user());
                    if let Err(e) = self.backend.track(id, payload).await {
                        warn!("Publishing presence failed: {}", e);
                    }
                }
                SessionUpdate::Live
            }
            ChannelEvent::Message(change) => {
                debug!("Change to message {}", change.id());
                let applied = self.store.apply(&change);
                self.after_change(&applied);
                SessionUpdate::Messages(applied)
            }
            ChannelEvent::Reaction(change) => {
                let applied = self.store.apply_reaction(&change);
                SessionUpdate::Messages(applied)
            }
            ChannelEvent::PresenceSync(state) => {
                self.presence.apply(&state);
                SessionUpdate::Presence {
                    online: self.presence.count(),
                }
            }
        }
    }

    /// Send, or save the edit in progress.
    ///
    /// An upload failure aborts before any message is written. The reply or
    /// edit intent is kept when the request fails. Edits only replace text.
    pub async fn submit(&mut self, text: &str, upload: Option<Upload>) -> ChatResult<()> {
        if let Some(id) = self.composer.editing.clone() {
            if let Some(upload) = upload {
                warn!("Refusing {} while editing {}", upload.file_name, id);
                return Err(ChatError::AttachWhileEditing);
            }
            self.store.edit_message(&id, text).await?;
            self.composer.editing = None;
            return Ok(());
        }

        if text.trim().is_empty() && upload.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        let attachment = match upload {
            Some(upload) => Some(attachments::upload(self.backend.as_ref(), upload).await?),
            None => None,
        };

        self.store
            .send_message(text, attachment, self.composer.reply_to.clone())
            .await?;
        self.composer.reply_to = None;
        let snapshot = self.store.snapshot();
        self.search.refresh(&snapshot);
        Ok(())
    }

    pub async fn load_older(&mut self) -> ChatResult<LoadOutcome> {
        let outcome = self.store.load_older().await?;
        let snapshot = self.store.snapshot();
        self.search.refresh(&snapshot);
        Ok(outcome)
    }

    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> ChatResult<Toggle> {
        self.reactions.toggle(id, self.store.user(), emoji).await
    }

    pub async fn delete_message(&self, id: &MessageId) -> ChatResult<()> {
        self.store.delete_message(id).await
    }

    pub async fn clear_history(&self) -> ChatResult<u64> {
        self.store.clear_history().await
    }

    fn loaded(&self, id: &MessageId) -> ChatResult<()> {
        match self.store.get(id) {
            Some(_) => Ok(()),
            None => Err(ChatError::UnknownMessage(id.clone())),
        }
    }

    fn after_change(&mut self, applied: &Applied) {
        if let Applied::Removed(id) = applied {
            if self.composer.forget(id) {
                debug!("Dropped composer intent on deleted message {}", id);
            }
        }
        if *applied != Applied::Ignored {
            let snapshot = self.store.snapshot();
            self.search.refresh(&snapshot);
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.backend.unsubscribe(id);
            info!("Room session {} closed", id);
        }
    }
}
