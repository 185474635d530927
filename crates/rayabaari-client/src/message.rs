use chrono::{DateTime, Utc};

use rayabaari_crypto::Codec;
use rayabaari_types::{Attachment, MessageId, MessageRow, ReactionRow};

/// Quote text for a reply whose target has no text.
pub const ATTACHMENT_PREVIEW: &str = "📎 Attachment";

/// A decrypted message as the view sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub room_key: String,
    pub author: String,
    /// Plaintext. Empty for attachment-only messages.
    pub content: String,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<ReactionRow>,
}

impl Message {
    pub fn from_row(row: MessageRow, codec: &Codec) -> Self {
        let attachment = row.attachment();
        let content = codec.decrypt(&row.content);

        let mut reactions: Vec<ReactionRow> = Vec::with_capacity(row.reactions.len());
        for reaction in row.reactions {
            if !reactions.contains(&reaction) {
                reactions.push(reaction);
            }
        }

        Self {
            id: row.id,
            room_key: row.room_key,
            author: row.author,
            content,
            attachment,
            reply_to: row.reply_to,
            edited: row.edited,
            created_at: row.created_at,
            reactions,
        }
    }

    pub fn is_attachment_only(&self) -> bool {
        self.content.is_empty() && self.attachment.is_some()
    }

    /// One-line preview used when quoting this message.
    pub fn preview(&self) -> &str {
        if self.content.is_empty() {
            ATTACHMENT_PREVIEW
        } else {
            &self.content
        }
    }
}

/// What a reply renders above its own body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPreview {
    Quote { author: String, text: String },
    /// Target deleted, or older than the loaded history.
    Deleted,
}

impl ReplyPreview {
    pub fn resolve(messages: &[Message], target: &MessageId) -> Self {
        match messages.iter().find(|m| &m.id == target) {
            Some(m) => Self::Quote {
                author: m.author.clone(),
                text: m.preview().to_string(),
            },
            None => Self::Deleted,
        }
    }
}
