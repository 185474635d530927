//! History reconciliation against a scripted backend whose fetches can be held
//! open, so interleavings are deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use rayabaari_client::{ChatError, LoadOutcome, MessageStore};
use rayabaari_crypto::Codec;
use rayabaari_crypto::keys::generate_key;
use rayabaari_types::api::{MessageQuery, NewMessage, PresencePayload};
use rayabaari_types::events::MessageChange;
use rayabaari_types::{
    Backend, BackendError, BackendResult, MessageId, MessageRow, PAGE_SIZE, ReactionRow, RoomRow,
    Subscription, SubscriptionId,
};

#[derive(Default)]
struct Scripted {
    rows: Mutex<Vec<MessageRow>>,
    gate: Option<Arc<Notify>>,
    fetches: AtomicUsize,
}

impl Scripted {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn seed(&self, rows: impl IntoIterator<Item = MessageRow>) {
        self.rows.lock().unwrap().extend(rows);
    }
}

fn unsupported<T>() -> BackendResult<T> {
    Err(BackendError::Unavailable("not scripted".into()))
}

#[async_trait]
impl Backend for Scripted {
    async fn fetch_messages(&self, query: MessageQuery) -> BackendResult<Vec<MessageRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let mut rows: Vec<MessageRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.room_key == query.room_key)
            .filter(|r| query.before.is_none_or(|b| r.created_at < b))
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        rows.truncate(query.limit as usize);
        Ok(rows)
    }
    async fn insert_message(&self, _: NewMessage) -> BackendResult<MessageRow> {
        unsupported()
    }
    async fn update_message(&self, _: &MessageId, _: String) -> BackendResult<()> {
        unsupported()
    }
    async fn delete_message(&self, _: &MessageId) -> BackendResult<MessageRow> {
        unsupported()
    }
    async fn delete_room_messages(&self, _: &str) -> BackendResult<u64> {
        unsupported()
    }
    async fn insert_reaction(&self, _: &ReactionRow) -> BackendResult<bool> {
        unsupported()
    }
    async fn delete_reaction(&self, _: &ReactionRow) -> BackendResult<bool> {
        unsupported()
    }
    async fn fetch_rooms(&self) -> BackendResult<Vec<RoomRow>> {
        unsupported()
    }
    async fn insert_room(&self, _: RoomRow) -> BackendResult<()> {
        unsupported()
    }
    async fn update_room(&self, _: &str, _: RoomRow) -> BackendResult<()> {
        unsupported()
    }
    async fn delete_room(&self, _: &str) -> BackendResult<()> {
        unsupported()
    }
    async fn upload_blob(&self, _: &str, _: &str, _: &str, _: Vec<u8>) -> BackendResult<()> {
        unsupported()
    }
    fn public_url(&self, bucket: &str, file: &str) -> String {
        format!("http://scripted/storage/v1/object/public/{}/{}", bucket, file)
    }
    async fn remove_blob(&self, _: &str, _: &str) -> BackendResult<()> {
        unsupported()
    }
    async fn subscribe(&self, _: &str) -> BackendResult<Subscription> {
        unsupported()
    }
    async fn track(&self, _: SubscriptionId, _: PresencePayload) -> BackendResult<()> {
        unsupported()
    }
    fn unsubscribe(&self, _: SubscriptionId) {}
    async fn register_push(&self, _: &str, _: serde_json::Value) -> BackendResult<()> {
        unsupported()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Row `id` created `id` seconds after the epoch offset.
fn row(codec: &Codec, id: i64) -> MessageRow {
    MessageRow {
        id: MessageId::from(id),
        room_key: "alpha".into(),
        author: "ravi".into(),
        content: codec.encrypt(&format!("m{}", id)).unwrap(),
        reply_to: None,
        attachment_url: None,
        attachment_kind: None,
        edited: false,
        created_at: at(id),
        reactions: vec![],
    }
}

fn ids(store: &MessageStore) -> Vec<String> {
    store.snapshot().iter().map(|m| m.id.to_string()).collect()
}

async fn wait_for_fetches(backend: &Scripted, n: usize) {
    while backend.fetches.load(Ordering::SeqCst) < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn older_page_then_live_changes() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    backend.seed([5].map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");

    for id in [10, 20, 30] {
        store.apply(&MessageChange::Insert(row(&codec, id)));
    }
    assert_eq!(ids(&store), ["10", "20", "30"]);

    assert_eq!(store.load_older().await.unwrap(), LoadOutcome::Loaded { fetched: 1 });
    assert!(!store.has_more());

    store.apply(&MessageChange::Delete { id: MessageId::from(20) });
    store.apply(&MessageChange::Insert(row(&codec, 25)));
    assert_eq!(ids(&store), ["5", "10", "25", "30"]);
    assert_eq!(store.snapshot()[2].content, "m25");
}

#[tokio::test]
async fn pagination_stops_on_short_page() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    let total = PAGE_SIZE as i64 * 2 + 5;
    backend.seed((1..=total).map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");

    assert_eq!(
        store.load_initial().await.unwrap(),
        LoadOutcome::Loaded { fetched: PAGE_SIZE as usize }
    );
    assert!(store.has_more());
    store.load_older().await.unwrap();
    assert_eq!(store.load_older().await.unwrap(), LoadOutcome::Loaded { fetched: 5 });
    assert!(!store.has_more());

    assert_eq!(store.load_older().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(backend.fetches.load(Ordering::SeqCst), 3);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), total as usize);
    assert!(snapshot.is_sorted_by_key(|m| m.created_at));
}

#[tokio::test]
async fn overlapping_pages_are_deduplicated() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    backend.seed([1, 2, 3].map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");

    store.load_initial().await.unwrap();
    store.apply(&MessageChange::Insert(row(&codec, 2)));
    store.load_initial().await.unwrap();
    assert_eq!(ids(&store), ["1", "2", "3"]);
}

#[tokio::test]
async fn concurrent_loads_are_skipped() {
    let codec = Arc::new(Codec::new(generate_key()));
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(Scripted::gated(gate.clone()));
    backend.seed([1, 2].map(|id| row(&codec, id)));
    let store = Arc::new(MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha"));

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.load_initial().await }
    });
    wait_for_fetches(&backend, 1).await;
    assert!(store.is_loading());

    assert_eq!(store.load_older().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(store.load_initial().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), LoadOutcome::Loaded { fetched: 2 });
    assert!(!store.is_loading());
}

#[tokio::test]
async fn live_arrivals_survive_initial_load() {
    let codec = Arc::new(Codec::new(generate_key()));
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(Scripted::gated(gate.clone()));
    backend.seed([10, 20].map(|id| row(&codec, id)));
    let store = Arc::new(MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha"));

    let load = tokio::spawn({
        let store = store.clone();
        async move { store.load_initial().await }
    });
    wait_for_fetches(&backend, 1).await;
    store.apply(&MessageChange::Insert(row(&codec, 100)));

    gate.notify_one();
    load.await.unwrap().unwrap();
    assert_eq!(ids(&store), ["10", "20", "100"]);
}

#[tokio::test]
async fn reload_after_room_cleared_is_empty() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    backend.seed([1, 2, 3].map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");

    store.load_initial().await.unwrap();
    assert_eq!(ids(&store), ["1", "2", "3"]);

    backend.rows.lock().unwrap().clear();
    let outcome = store.load_initial().await.unwrap();
    assert_eq!(outcome, LoadOutcome::Loaded { fetched: 0 });
    assert!(ids(&store).is_empty());
    assert!(!store.has_more());
}

#[tokio::test]
async fn reload_drops_messages_gone_from_the_server() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    backend.seed([10, 20].map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");

    store.load_initial().await.unwrap();
    // Arrived live, then deleted while nobody was listening
    store.apply(&MessageChange::Insert(row(&codec, 30)));
    assert_eq!(ids(&store), ["10", "20", "30"]);

    store.load_initial().await.unwrap();
    assert_eq!(ids(&store), ["10", "20"]);
}

#[tokio::test]
async fn failed_mutations_leave_collection_untouched() {
    let codec = Arc::new(Codec::new(generate_key()));
    let backend = Arc::new(Scripted::default());
    backend.seed([1, 2].map(|id| row(&codec, id)));
    let store = MessageStore::new(backend.clone(), codec.clone(), "alpha", "asha");
    store.load_initial().await.unwrap();
    let before = store.snapshot();

    let id = MessageId::from(1);
    assert!(matches!(store.edit_message(&id, "changed").await, Err(ChatError::Mutation(_))));
    assert!(matches!(store.delete_message(&id).await, Err(ChatError::Mutation(_))));

    assert_eq!(store.snapshot(), before);
    assert_eq!(store.get(&id).unwrap().content, "m1");
}
