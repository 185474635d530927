use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rayabaari_crypto::Codec;
use rayabaari_types::api::{MessageQuery, NewMessage};
use rayabaari_types::events::{MessageChange, ReactionChange};
use rayabaari_types::{Attachment, Backend, MessageId, MessageRow, PAGE_SIZE};

use crate::attachments;
use crate::error::{ChatError, ChatResult};
use crate::message::{Message, ReplyPreview};

/// Result of a history load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was fetched and merged.
    Loaded { fetched: usize },
    /// Another load was in flight, or there is nothing older to fetch.
    Skipped,
}

/// What a change did to the loaded collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Inserted(MessageId),
    Updated(MessageId),
    /// Consumers holding a reply or edit intent on this id must drop it.
    Removed(MessageId),
    Reacted(MessageId),
    /// Duplicate, unknown target, or another room.
    Ignored,
}

/// Ordered, deduplicated view of one room's loaded messages.
///
/// Every change swaps in a whole new collection, so readers holding a
/// snapshot never see a half-applied update.
pub struct MessageStore {
    backend: Arc<dyn Backend>,
    codec: Arc<Codec>,
    room_key: String,
    user: String,
    messages: watch::Sender<Arc<Vec<Message>>>,
    has_more: AtomicBool,
    loading: AtomicBool,
}

/// Clears the in-flight flag however the load ends.
struct LoadGuard<'a>(&'a AtomicBool);

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MessageStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        codec: Arc<Codec>,
        room_key: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let (messages, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            backend,
            codec,
            room_key: room_key.into(),
            user: user.into(),
            messages,
            has_more: AtomicBool::new(true),
            loading: AtomicBool::new(false),
        }
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current collection, oldest first.
    pub fn snapshot(&self) -> Arc<Vec<Message>> {
        self.messages.borrow().clone()
    }

    /// Change feed: the receiver wakes whenever a new collection is published.
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Message>>> {
        self.messages.subscribe()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.borrow().iter().find(|m| &m.id == id).cloned()
    }

    pub fn has_more(&self) -> bool {
        self.has_more.load(Ordering::Acquire)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// The loaded message a reply points at. `None` renders as deleted.
    pub fn reply_target(&self, id: &MessageId) -> Option<Message> {
        let target = self.get(id);
        if target.is_none() {
            debug!("Reply target {} is not loaded", id);
        }
        target
    }

    /// Quote for a reply. `None` when the message is not a reply.
    pub fn reply_preview(&self, message: &Message) -> Option<ReplyPreview> {
        let target = message.reply_to.as_ref()?;
        Some(ReplyPreview::resolve(&self.messages.borrow(), target))
    }

    // -- History --

    /// Replace the collection with the newest page.
    ///
    /// Realtime inserts that landed while the fetch was in flight and are newer
    /// than everything fetched are kept. Anything loaded before is dropped.
    pub async fn load_initial(&self) -> ChatResult<LoadOutcome> {
        let Some(_guard) = self.begin_load() else {
            debug!("Initial load skipped, another load is in flight");
            return Ok(LoadOutcome::Skipped);
        };
        let before: HashSet<MessageId> = self.messages.borrow().iter().map(|m| m.id.clone()).collect();

        let rows = self.fetch(MessageQuery::newest(&self.room_key, PAGE_SIZE)).await?;
        let fetched = rows.len();
        self.has_more.store(fetched == PAGE_SIZE as usize, Ordering::Release);
        let page = self.decode_page(rows);

        self.replace(|current| {
            let newest = page.last().map(|m| m.created_at);
            let live: Vec<Message> = {
                let fetched_ids: HashSet<&MessageId> = page.iter().map(|m| &m.id).collect();
                current
                    .iter()
                    .filter(|m| !before.contains(&m.id))
                    .filter(|m| newest.is_none_or(|t| m.created_at > t))
                    .filter(|m| !fetched_ids.contains(&m.id))
                    .cloned()
                    .collect()
            };

            let mut next = page;
            next.extend(live);
            next
        });

        info!("Loaded {} messages", fetched);
        Ok(LoadOutcome::Loaded { fetched })
    }

    /// Prepend the page before the oldest loaded message.
    pub async fn load_older(&self) -> ChatResult<LoadOutcome> {
        if !self.has_more() {
            debug!("No older messages to load");
            return Ok(LoadOutcome::Skipped);
        }
        let Some(_guard) = self.begin_load() else {
            debug!("Older load skipped, another load is in flight");
            return Ok(LoadOutcome::Skipped);
        };

        let oldest = self.messages.borrow().first().map(|m| m.created_at);
        let mut query = MessageQuery::newest(&self.room_key, PAGE_SIZE);
        if let Some(cursor) = oldest {
            query = query.before(cursor);
        }

        let rows = self.fetch(query).await?;
        let fetched = rows.len();
        self.has_more.store(fetched == PAGE_SIZE as usize, Ordering::Release);
        let page = self.decode_page(rows);

        self.replace(|current| {
            let known: HashSet<&MessageId> = current.iter().map(|m| &m.id).collect();
            let mut next: Vec<Message> = page
                .into_iter()
                .filter(|m| !known.contains(&m.id))
                .collect();
            next.extend(current.iter().cloned());
            if !next.is_sorted_by_key(|m| m.created_at) {
                next.sort_by_key(|m| m.created_at);
            }
            next
        });

        debug!("Loaded {} older messages", fetched);
        Ok(LoadOutcome::Loaded { fetched })
    }

    // -- Realtime --

    pub fn apply(&self, change: &MessageChange) -> Applied {
        match change {
            MessageChange::Insert(row) => self.apply_insert(row),
            MessageChange::Update(row) => self.apply_update(row),
            MessageChange::Delete { id } => self.apply_delete(id),
        }
    }

    pub fn apply_reaction(&self, change: &ReactionChange) -> Applied {
        let (reaction, insert) = match change {
            ReactionChange::Insert(r) => (r, true),
            ReactionChange::Delete(r) => (r, false),
        };

        let changed = self.modify(|current| {
            let index = current.iter().position(|m| m.id == reaction.message_id)?;
            let present = current[index].reactions.contains(reaction);
            if present == insert {
                return None;
            }

            let mut next = current.to_vec();
            let reactions = &mut next[index].reactions;
            if insert {
                reactions.push(reaction.clone());
            } else {
                reactions.retain(|r| r != reaction);
            }
            Some(next)
        });

        if changed {
            Applied::Reacted(reaction.message_id.clone())
        } else {
            Applied::Ignored
        }
    }

    fn apply_insert(&self, row: &MessageRow) -> Applied {
        if row.room_key != self.room_key {
            warn!("Dropping insert {} addressed to another room", row.id);
            return Applied::Ignored;
        }

        let message = Message::from_row(row.clone(), &self.codec);
        let id = message.id.clone();
        let changed = self.modify(|current| {
            if current.iter().any(|m| m.id == message.id) {
                return None;
            }
            let at = current.partition_point(|m| m.created_at <= message.created_at);
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend_from_slice(&current[..at]);
            next.push(message);
            next.extend_from_slice(&current[at..]);
            Some(next)
        });

        if changed {
            Applied::Inserted(id)
        } else {
            debug!("Duplicate insert {} ignored", id);
            Applied::Ignored
        }
    }

    fn apply_update(&self, row: &MessageRow) -> Applied {
        if row.room_key != self.room_key {
            warn!("Dropping update {} addressed to another room", row.id);
            return Applied::Ignored;
        }

        let content = self.codec.decrypt(&row.content);
        let changed = self.modify(|current| {
            let index = current.iter().position(|m| m.id == row.id)?;
            let mut next = current.to_vec();
            next[index].content = content;
            next[index].edited = row.edited;
            Some(next)
        });

        if changed {
            Applied::Updated(row.id.clone())
        } else {
            debug!("Update for unloaded message {} ignored", row.id);
            Applied::Ignored
        }
    }

    fn apply_delete(&self, id: &MessageId) -> Applied {
        let changed = self.modify(|current| {
            current.iter().any(|m| &m.id == id).then(|| {
                current.iter().filter(|m| &m.id != id).cloned().collect()
            })
        });

        if changed {
            Applied::Removed(id.clone())
        } else {
            Applied::Ignored
        }
    }

    // -- Mutations --

    /// Encrypt and insert a message. The acknowledged row is merged right away;
    /// its realtime echo is then a duplicate.
    pub async fn send_message(
        &self,
        text: &str,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    ) -> ChatResult<MessageId> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let content = self.encrypt(text)?;
        let row = self
            .backend
            .insert_message(NewMessage {
                author: self.user.clone(),
                content,
                room_key: self.room_key.clone(),
                reply_to,
                attachment,
            })
            .await
            .map_err(|e| {
                error!("Send failed: {}", e);
                ChatError::Mutation(e)
            })?;

        let id = row.id.clone();
        self.apply_insert(&row);
        Ok(id)
    }

    pub async fn edit_message(&self, id: &MessageId, text: &str) -> ChatResult<()> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let content = self.encrypt(text)?;
        self.backend.update_message(id, content).await.map_err(|e| {
            error!("Edit of {} failed: {}", id, e);
            ChatError::Mutation(e)
        })
    }

    /// Delete the row, then its attachment blob if it had one. Works for
    /// messages outside the loaded pages too.
    pub async fn delete_message(&self, id: &MessageId) -> ChatResult<()> {
        let row = self.backend.delete_message(id).await.map_err(|e| {
            error!("Delete of {} failed: {}", id, e);
            ChatError::Mutation(e)
        })?;

        let Some(attachment) = row.attachment() else {
            return Ok(());
        };
        match attachments::locate(&attachment.url) {
            Some((bucket, file)) => {
                if let Err(e) = self.backend.remove_blob(&bucket, &file).await {
                    warn!("Message {} deleted but its blob remains: {}", id, e);
                }
            }
            None => warn!("Cannot locate blob for {}", attachment.url),
        }
        Ok(())
    }

    /// Delete every message in the room. Returns the number removed.
    pub async fn clear_history(&self) -> ChatResult<u64> {
        let removed = self
            .backend
            .delete_room_messages(&self.room_key)
            .await
            .map_err(|e| {
                error!("Clearing history failed: {}", e);
                ChatError::Mutation(e)
            })?;
        info!("Cleared {} messages", removed);
        Ok(removed)
    }

    // -- Internals --

    fn begin_load(&self) -> Option<LoadGuard<'_>> {
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadGuard(&self.loading))
    }

    async fn fetch(&self, query: MessageQuery) -> ChatResult<Vec<MessageRow>> {
        self.backend.fetch_messages(query).await.map_err(|e| {
            error!("Fetching messages failed: {}", e);
            ChatError::Fetch(e)
        })
    }

    /// Newest-first rows to an oldest-first page.
    fn decode_page(&self, rows: Vec<MessageRow>) -> Vec<Message> {
        rows.into_iter()
            .rev()
            .map(|row| Message::from_row(row, &self.codec))
            .collect()
    }

    fn encrypt(&self, text: &str) -> ChatResult<String> {
        self.codec.encrypt(text).map_err(|e| {
            error!("Refusing to send unencrypted content: {}", e);
            ChatError::Encrypt(e.to_string())
        })
    }

    /// Publish `f(current)` unconditionally.
    fn replace<F>(&self, f: F)
    where
        F: FnOnce(&[Message]) -> Vec<Message>,
    {
        self.messages.send_modify(|current| {
            let next = f(current.as_slice());
            *current = Arc::new(next);
        });
    }

    /// Publish `f(current)` if it returns a new collection.
    fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&[Message]) -> Option<Vec<Message>>,
    {
        self.messages.send_if_modified(|current| {
            let next = f(current.as_slice());
            match next {
                Some(next) => {
                    *current = Arc::new(next);
                    true
                }
                None => false,
            }
        })
    }
}
