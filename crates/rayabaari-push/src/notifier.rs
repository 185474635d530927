use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use rayabaari_db::Database;
use rayabaari_types::{MessageRow, PushSubscriptionRow};

use crate::transport::{PushError, PushPayload, PushTransport};

/// Delivery counts for one message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Notifier {
    db: Arc<Database>,
    transport: Arc<dyn PushTransport>,
}

impl Notifier {
    pub fn new(db: Arc<Database>, transport: Arc<dyn PushTransport>) -> Self {
        Self { db, transport }
    }

    /// Store a device subscription for `username`. Re-registering the same
    /// subscription is a no-op.
    pub async fn register(&self, username: &str, subscription: Value) -> Result<(), PushError> {
        let db = self.db.clone();
        let username = username.to_string();
        tokio::task::spawn_blocking(move || db.insert_push_subscription(&username, &subscription))
            .await
            .map_err(|e| PushError::Store(e.to_string()))?
            .map_err(|e| PushError::Store(e.to_string()))
    }

    /// Notify everyone subscribed except the author. Every send is attempted;
    /// one failure does not stop the rest.
    pub async fn notify_insert(&self, row: &MessageRow) -> Result<PushReport, PushError> {
        let targets = self.subscriptions_except(&row.author).await?;
        if targets.is_empty() {
            return Ok(PushReport::default());
        }

        let payload = PushPayload::new_message(&row.author);
        let results = join_all(
            targets
                .iter()
                .map(|target| self.transport.send(&target.subscription, &payload)),
        )
        .await;

        let mut report = PushReport::default();
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Push to {} failed: {}", target.username, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Push for message {}: {} delivered, {} failed",
            row.id, report.delivered, report.failed
        );
        Ok(report)
    }

    /// Fan out every insert from the feed until it closes.
    pub async fn run(self, mut inserts: broadcast::Receiver<MessageRow>) {
        loop {
            match inserts.recv().await {
                Ok(row) => {
                    if let Err(e) = self.notify_insert(&row).await {
                        error!("Push fan-out for {} failed: {}", row.id, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Push fan-out lagged, {} messages not announced", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Push fan-out stopped");
    }

    async fn subscriptions_except(&self, author: &str) -> Result<Vec<PushSubscriptionRow>, PushError> {
        let db = self.db.clone();
        let author = author.to_string();
        tokio::task::spawn_blocking(move || db.push_subscriptions_except(&author))
            .await
            .map_err(|e| PushError::Store(e.to_string()))?
            .map_err(|e| PushError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rayabaari_types::MessageId;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Value, PushPayload)>>,
    }

    #[async_trait]
    impl PushTransport for Recorder {
        async fn send(&self, subscription: &Value, payload: &PushPayload) -> Result<(), PushError> {
            if subscription["endpoint"] == "dead" {
                return Err(PushError::Status(410));
            }
            self.sent
                .lock()
                .unwrap()
                .push((subscription.clone(), payload.clone()));
            Ok(())
        }
    }

    fn row(author: &str) -> MessageRow {
        MessageRow {
            id: MessageId::from(1),
            room_key: "alpha".into(),
            author: author.into(),
            content: "ciphertext".into(),
            reply_to: None,
            attachment_url: None,
            attachment_kind: None,
            edited: false,
            created_at: Utc::now(),
            reactions: vec![],
        }
    }

    fn setup() -> (Arc<Recorder>, Notifier) {
        let db = Database::open_in_memory().unwrap();
        db.insert_push_subscription("asha", &json!({"endpoint": "asha-phone"})).unwrap();
        db.insert_push_subscription("ravi", &json!({"endpoint": "ravi-phone"})).unwrap();
        db.insert_push_subscription("ravi", &json!({"endpoint": "dead"})).unwrap();
        db.insert_push_subscription("meera", &json!({"endpoint": "meera-laptop"})).unwrap();

        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(Arc::new(db), recorder.clone());
        (recorder, notifier)
    }

    #[tokio::test]
    async fn author_is_skipped_and_failures_are_counted() {
        let (recorder, notifier) = setup();
        let report = notifier.notify_insert(&row("asha")).await.unwrap();
        assert_eq!(report, PushReport { delivered: 2, failed: 1 });

        let sent = recorder.sent.lock().unwrap();
        assert!(sent.iter().all(|(s, _)| s["endpoint"] != "asha-phone"));
        assert!(sent.iter().all(|(_, p)| p.title == "Message from asha"));
        assert!(sent.iter().all(|(_, p)| !p.body.contains("ciphertext")));
    }

    #[tokio::test]
    async fn registered_devices_receive_pushes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(db, recorder.clone());

        let device = json!({"endpoint": "meera-tablet"});
        notifier.register("meera", device.clone()).await.unwrap();
        notifier.register("meera", device.clone()).await.unwrap();

        let report = notifier.notify_insert(&row("asha")).await.unwrap();
        assert_eq!(report, PushReport { delivered: 1, failed: 0 });
        assert_eq!(recorder.sent.lock().unwrap()[0].0, device);
    }

    #[tokio::test]
    async fn nobody_else_subscribed() {
        let db = Database::open_in_memory().unwrap();
        db.insert_push_subscription("asha", &json!({"endpoint": "asha-phone"})).unwrap();
        let notifier = Notifier::new(Arc::new(db), Arc::new(Recorder::default()));
        assert_eq!(
            notifier.notify_insert(&row("asha")).await.unwrap(),
            PushReport::default()
        );
    }

    #[tokio::test]
    async fn run_stops_when_feed_closes() {
        let (recorder, notifier) = setup();
        let (tx, rx) = broadcast::channel(8);
        let task = tokio::spawn(notifier.run(rx));

        tx.send(row("meera")).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }
}
