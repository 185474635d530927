use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Attachment, MessageId};

// -- Messages --

/// A history query: newest first, optionally strictly older than a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub room_key: String,
    pub limit: u32,
    pub before: Option<DateTime<Utc>>,
}

impl MessageQuery {
    pub fn newest(room_key: impl Into<String>, limit: u32) -> Self {
        Self {
            room_key: room_key.into(),
            limit,
            before: None,
        }
    }

    pub fn before(mut self, cursor: DateTime<Utc>) -> Self {
        self.before = Some(cursor);
        self
    }
}

/// Insert request for a message row. `content` is already encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub author: String,
    pub content: String,
    pub room_key: String,
    pub reply_to: Option<MessageId>,
    pub attachment: Option<Attachment>,
}

// -- Presence --

/// What a client publishes about itself once its subscription is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user: String,
    pub online_at: DateTime<Utc>,
}

impl PresencePayload {
    pub fn now(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            online_at: Utc::now(),
        }
    }
}
