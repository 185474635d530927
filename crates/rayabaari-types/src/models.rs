use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Message identifier as the service hands it out.
///
/// Some transports deliver ids as JSON numbers and others as strings, so the
/// id is always kept as text and compared as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Signed(i64),
            Unsigned(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Signed(n) => Self(n.to_string()),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

// -- Attachments --

/// How an attachment is presented. Decided once, when the file is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Pdf,
    Generic,
}

impl AttachmentKind {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime == "application/pdf" {
            Self::Pdf
        } else {
            Self::Generic
        }
    }

    /// Guess the kind from a URL's file extension.
    /// Only used for rows written before the kind was stored alongside the URL.
    pub fn sniff_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Self::Generic;
        };

        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "webm" | "ogg" | "mov" => Self::Video,
            "pdf" => Self::Pdf,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" | "avif" => Self::Image,
            _ => Self::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "pdf" => Some(Self::Pdf),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Storage bucket the attachment lives in.
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Image => "chat_images",
            Self::Video => "chat_videos",
            Self::Pdf => "chat_pdfs",
            Self::Generic => "chat_files",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub kind: AttachmentKind,
}

// -- Rows --

/// A message row as stored by the service. `content` is ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    #[serde(rename = "room_secret_code")]
    pub room_key: String,
    #[serde(rename = "username")]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "reply_to_id", default)]
    pub reply_to: Option<MessageId>,
    #[serde(rename = "image_url", default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_kind: Option<AttachmentKind>,
    #[serde(rename = "is_edited", default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    /// Joined reactions. Only present on page fetches, never on realtime rows.
    #[serde(default)]
    pub reactions: Vec<ReactionRow>,
}

impl MessageRow {
    /// The row's attachment, resolving legacy rows that only stored a URL.
    pub fn attachment(&self) -> Option<Attachment> {
        let url = self.attachment_url.as_deref().filter(|u| !u.is_empty())?;
        Some(Attachment {
            url: url.to_string(),
            kind: self
                .attachment_kind
                .unwrap_or_else(|| AttachmentKind::sniff_url(url)),
        })
    }
}

/// A (message, author, emoji) fact. Unique on the whole triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionRow {
    pub message_id: MessageId,
    #[serde(rename = "username")]
    pub author: String,
    pub emoji: String,
}

impl ReactionRow {
    pub fn new(message_id: MessageId, author: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            message_id,
            author: author.into(),
            emoji: emoji.into(),
        }
    }
}

/// A room as stored by the service. `secret_code` is encrypted at rest
/// (older rows may still hold it in plaintext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRow {
    #[serde(rename = "room_name")]
    pub name: String,
    pub secret_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscriptionRow {
    pub username: String,
    #[serde(rename = "subscription_json")]
    pub subscription: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_accepts_numbers_and_strings() {
        let from_number: MessageId = serde_json::from_str("42").unwrap();
        let from_string: MessageId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.as_str(), "42");
    }

    #[test]
    fn kind_from_mime() {
        assert_eq!(AttachmentKind::from_mime("image/png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_mime("video/mp4"), AttachmentKind::Video);
        assert_eq!(AttachmentKind::from_mime("application/pdf"), AttachmentKind::Pdf);
        assert_eq!(AttachmentKind::from_mime("application/zip"), AttachmentKind::Generic);
    }

    #[test]
    fn legacy_row_sniffs_kind_from_url() {
        let row: MessageRow = serde_json::from_value(serde_json::json!({
            "id": 7,
            "room_secret_code": "alpha",
            "username": "asha",
            "content": "",
            "image_url": "https://cdn.example/storage/v1/object/public/chat_videos/1_abc.MP4?download",
            "created_at": "2025-01-01T10:00:00Z"
        }))
        .unwrap();

        let attachment = row.attachment().unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Video);
        assert!(row.reactions.is_empty());
        assert!(!row.edited);
    }

    #[test]
    fn stored_kind_wins_over_extension() {
        let row = MessageRow {
            id: MessageId::from(1),
            room_key: "alpha".into(),
            author: "asha".into(),
            content: String::new(),
            reply_to: None,
            attachment_url: Some("https://cdn.example/x/report".into()),
            attachment_kind: Some(AttachmentKind::Pdf),
            edited: false,
            created_at: Utc::now(),
            reactions: vec![],
        };
        assert_eq!(row.attachment().unwrap().kind, AttachmentKind::Pdf);
    }
}
