use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use rayabaari_types::api::PresencePayload;
use rayabaari_types::events::ChannelEvent;
use rayabaari_types::{MessageRow, SubscriptionId};

struct Subscriber {
    tx: mpsc::UnboundedSender<ChannelEvent>,
    presence: Option<PresencePayload>,
}

#[derive(Default)]
struct Channels {
    /// room_key -> subscription -> subscriber
    rooms: HashMap<String, HashMap<SubscriptionId, Subscriber>>,
    /// subscription -> room_key
    index: HashMap<SubscriptionId, String>,
}

/// Fans row changes and presence out to the subscribers of each room.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    channels: RwLock<Channels>,

    /// Every message insert across all rooms, for server-side hooks (push).
    inserts_tx: broadcast::Sender<MessageRow>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (inserts_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                channels: RwLock::new(Channels::default()),
                inserts_tx,
            }),
        }
    }

    /// Open a room channel. The receiver gets `Subscribed` followed by the
    /// current presence state.
    pub fn subscribe(&self, room_key: &str) -> (SubscriptionId, mpsc::UnboundedReceiver<ChannelEvent>) {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut guard = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let channels = &mut *guard;
        let room = channels.rooms.entry(room_key.to_string()).or_default();
        let _ = tx.send(ChannelEvent::Subscribed);
        let _ = tx.send(ChannelEvent::PresenceSync(presence_state(room)));
        room.insert(id, Subscriber { tx, presence: None });
        channels.index.insert(id, room_key.to_string());

        info!("Subscription {} opened on room channel ({} subscribers)", id, room.len());
        (id, rx)
    }

    /// Attach presence to a subscription and sync the room. Returns false if
    /// the subscription is gone.
    pub fn track(&self, id: SubscriptionId, payload: PresencePayload) -> bool {
        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(room_key) = channels.index.get(&id).cloned() else {
            return false;
        };
        let Some(room) = channels.rooms.get_mut(&room_key) else {
            return false;
        };
        let Some(subscriber) = room.get_mut(&id) else {
            return false;
        };

        debug!("{} is online via {}", payload.user, id);
        subscriber.presence = Some(payload);
        sync_presence(room);
        true
    }

    /// Release a subscription. Calling it twice is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(room_key) = channels.index.remove(&id) else {
            return;
        };

        let Some(room) = channels.rooms.get_mut(&room_key) else {
            return;
        };
        let had_presence = room.remove(&id).is_some_and(|s| s.presence.is_some());
        if had_presence {
            sync_presence(room);
        }
        if room.is_empty() {
            channels.rooms.remove(&room_key);
        }

        info!("Subscription {} released", id);
    }

    /// Deliver an event to every subscriber of a room.
    pub fn publish(&self, room_key: &str, event: ChannelEvent) {
        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = channels.rooms.get_mut(room_key) else {
            return;
        };

        debug!("Publishing {} to {} subscribers", event.label(), room.len());
        let dead: Vec<SubscriptionId> = room
            .iter()
            .filter(|(_, s)| s.tx.send(event.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();

        if dead.is_empty() {
            return;
        }

        // Receivers dropped without unsubscribing
        let mut lost_presence = false;
        for id in &dead {
            lost_presence |= room.remove(id).is_some_and(|s| s.presence.is_some());
        }
        if lost_presence {
            sync_presence(room);
        }
        let now_empty = room.is_empty();
        for id in &dead {
            channels.index.remove(id);
        }
        if now_empty {
            channels.rooms.remove(room_key);
        }
    }

    pub fn publish_insert(&self, row: &MessageRow) {
        self.publish(
            &row.room_key,
            ChannelEvent::Message(rayabaari_types::events::MessageChange::Insert(row.clone())),
        );
        let _ = self.inner.inserts_tx.send(row.clone());
    }

    /// Every message insert, across rooms.
    pub fn subscribe_inserts(&self) -> broadcast::Receiver<MessageRow> {
        self.inner.inserts_tx.subscribe()
    }

    pub fn subscriber_count(&self, room_key: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .get(room_key)
            .map_or(0, HashMap::len)
    }
}

/// Presence state keyed by subscription, each holding a list of payloads.
fn presence_state(room: &HashMap<SubscriptionId, Subscriber>) -> Value {
    let mut state = Map::new();
    for (id, subscriber) in room {
        if let Some(payload) = &subscriber.presence {
            let entry = serde_json::to_value(payload).unwrap_or(Value::Null);
            state.insert(id.to_string(), Value::Array(vec![entry]));
        }
    }
    Value::Object(state)
}

fn sync_presence(room: &HashMap<SubscriptionId, Subscriber>) {
    let state = presence_state(room);
    for subscriber in room.values() {
        let _ = subscriber.tx.send(ChannelEvent::PresenceSync(state.clone()));
    }
}
