//! Client-side core of Rayabaari chat.
//!
//! [`MessageStore`] reconciles history pages, realtime changes and local
//! mutations into one ordered view per room. [`RoomSession`] wires a store to a
//! live room channel together with search, presence and reactions.

pub mod attachments;
pub mod error;
pub mod message;
pub mod presence;
pub mod reactions;
pub mod rooms;
pub mod search;
pub mod session;
pub mod store;

pub use error::{ChatError, ChatResult};
pub use message::{Message, ReplyPreview};
pub use presence::PresenceTracker;
pub use reactions::{ReactionAggregator, ReactionGroup, Toggle};
pub use rooms::{Login, Room, RoomDirectory};
pub use search::SearchIndex;
pub use session::{Composer, RoomSession, SessionUpdate};
pub use store::{Applied, LoadOutcome, MessageStore};
