use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{MessageId, MessageRow, ReactionRow};

/// A change to the messages table, scoped to one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageChange {
    Insert(MessageRow),
    Update(MessageRow),
    Delete { id: MessageId },
}

impl MessageChange {
    pub fn id(&self) -> &MessageId {
        match self {
            Self::Insert(row) | Self::Update(row) => &row.id,
            Self::Delete { id } => id,
        }
    }
}

/// A change to the reactions table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReactionChange {
    Insert(ReactionRow),
    Delete(ReactionRow),
}

/// Everything delivered on a room channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    /// The subscription is live; presence can now be tracked.
    Subscribed,
    Message(MessageChange),
    Reaction(ReactionChange),
    /// Full presence state: connection key -> payload(s).
    PresenceSync(Value),
}

impl ChannelEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Message(MessageChange::Insert(_)) => "message.insert",
            Self::Message(MessageChange::Update(_)) => "message.update",
            Self::Message(MessageChange::Delete { .. }) => "message.delete",
            Self::Reaction(ReactionChange::Insert(_)) => "reaction.insert",
            Self::Reaction(ReactionChange::Delete(_)) => "reaction.delete",
            Self::PresenceSync(_) => "presence.sync",
        }
    }
}

// -- Wire form --

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("{0} row missing from change payload")]
    MissingRow(&'static str),
    #[error("malformed change payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Row-level change notification as the realtime service sends it:
/// `{ "eventType": "INSERT" | "UPDATE" | "DELETE", "new": {..}, "old": {..} }`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl RawChange {
    fn take(value: Option<Value>, which: &'static str) -> Result<Value, ChangeError> {
        match value {
            Some(Value::Object(map)) if !map.is_empty() => Ok(Value::Object(map)),
            _ => Err(ChangeError::MissingRow(which)),
        }
    }
}

impl TryFrom<RawChange> for MessageChange {
    type Error = ChangeError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        match raw.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert(serde_json::from_value(RawChange::take(raw.new, "new")?)?)),
            "UPDATE" => Ok(Self::Update(serde_json::from_value(RawChange::take(raw.new, "new")?)?)),
            "DELETE" => {
                let mut old = RawChange::take(raw.old, "old")?;
                let id = old
                    .get_mut("id")
                    .map(Value::take)
                    .ok_or(ChangeError::MissingRow("old"))?;
                Ok(Self::Delete {
                    id: serde_json::from_value(id)?,
                })
            }
            _ => Err(ChangeError::UnknownEventType(raw.event_type)),
        }
    }
}

impl TryFrom<RawChange> for ReactionChange {
    type Error = ChangeError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        match raw.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert(serde_json::from_value(RawChange::take(raw.new, "new")?)?)),
            "DELETE" => Ok(Self::Delete(serde_json::from_value(RawChange::take(raw.old, "old")?)?)),
            _ => Err(ChangeError::UnknownEventType(raw.event_type)),
        }
    }
}
