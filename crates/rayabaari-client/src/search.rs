use rayabaari_types::MessageId;

use crate::message::Message;

/// Case-insensitive search over the loaded messages with a match cursor.
///
/// Matches are listed oldest first. Only loaded history is searched; older
/// pages are never fetched to satisfy a query.
#[derive(Debug, Default, Clone)]
pub struct SearchIndex {
    query: String,
    matches: Vec<MessageId>,
    cursor: Option<usize>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query(&mut self, query: impl Into<String>, messages: &[Message]) {
        self.query = query.into();
        self.refresh(messages);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Recompute matches. Call whenever the collection changes; the cursor
    /// returns to the first match.
    pub fn refresh(&mut self, messages: &[Message]) {
        self.matches = if self.query.trim().is_empty() {
            Vec::new()
        } else {
            let needle = self.query.to_lowercase();
            messages
                .iter()
                .filter(|m| {
                    m.content.to_lowercase().contains(&needle)
                        || m.author.to_lowercase().contains(&needle)
                })
                .map(|m| m.id.clone())
                .collect()
        };
        self.cursor = if self.matches.is_empty() { None } else { Some(0) };
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[MessageId] {
        &self.matches
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&MessageId> {
        self.matches.get(self.cursor?)
    }

    pub fn is_current(&self, id: &MessageId) -> bool {
        self.current() == Some(id)
    }

    pub fn is_match(&self, id: &MessageId) -> bool {
        self.matches.contains(id)
    }

    /// Advance, wrapping after the last match.
    pub fn next(&mut self) -> Option<&MessageId> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.cursor = Some(self.cursor.map_or(0, |c| (c + 1) % len));
        self.current()
    }

    /// Step back, wrapping before the first match.
    pub fn previous(&mut self) -> Option<&MessageId> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.cursor = Some(self.cursor.map_or(len - 1, |c| (c + len - 1) % len));
        self.current()
    }

    /// "current/total", one-based; "0/0" with no matches.
    pub fn status(&self) -> String {
        match self.cursor {
            Some(c) => format!("{}/{}", c + 1, self.matches.len()),
            None => "0/0".to_string(),
        }
    }
}
