use std::sync::Arc;

use tracing::{debug, error};

use rayabaari_types::{Backend, BackendError, MessageId, ReactionRow};

use crate::error::{ChatError, ChatResult};

/// Emojis offered by the reaction picker.
pub const PALETTE: [&str; 5] = ["👍", "❤️", "😂", "😮", "😢"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

/// One emoji and how many people reacted with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
}

/// Per-user reaction toggling against the reactions table.
///
/// The local collection is not touched here; the realtime echo updates it.
#[derive(Clone)]
pub struct ReactionAggregator {
    backend: Arc<dyn Backend>,
}

impl ReactionAggregator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Remove the reaction if it exists, otherwise add it.
    ///
    /// The delete is conditional on the triple, and the insert skips an
    /// existing triple, so racing toggles never leave duplicates behind.
    pub async fn toggle(&self, message_id: &MessageId, user: &str, emoji: &str) -> ChatResult<Toggle> {
        let reaction = ReactionRow::new(message_id.clone(), user, emoji);

        if self.backend.delete_reaction(&reaction).await.map_err(failed)? {
            debug!("{} removed {} from {}", user, emoji, message_id);
            return Ok(Toggle::Removed);
        }

        if !self.backend.insert_reaction(&reaction).await.map_err(failed)? {
            debug!("{} already reacted {} on {}", user, emoji, message_id);
        }
        Ok(Toggle::Added)
    }
}

fn failed(e: BackendError) -> ChatError {
    error!("Reaction toggle failed: {}", e);
    ChatError::Mutation(e)
}

/// Count reactions per emoji in first-seen order.
pub fn group_reactions(reactions: &[ReactionRow]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for reaction in reactions {
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => group.count += 1,
            None => groups.push(ReactionGroup {
                emoji: reaction.emoji.clone(),
                count: 1,
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_emoji_in_first_seen_order() {
        let id = MessageId::from(1);
        let reactions = vec![
            ReactionRow::new(id.clone(), "asha", "😂"),
            ReactionRow::new(id.clone(), "ravi", "👍"),
            ReactionRow::new(id.clone(), "ravi", "😂"),
        ];
        assert_eq!(
            group_reactions(&reactions),
            vec![
                ReactionGroup { emoji: "😂".into(), count: 2 },
                ReactionGroup { emoji: "👍".into(), count: 1 },
            ]
        );
        assert!(group_reactions(&[]).is_empty());
    }
}
