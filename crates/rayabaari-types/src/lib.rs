pub mod api;
pub mod backend;
pub mod events;
pub mod models;

pub use backend::{Backend, BackendError, BackendResult, Subscription, SubscriptionId};
pub use models::{
    Attachment, AttachmentKind, MessageId, MessageRow, PushSubscriptionRow, ReactionRow, RoomRow,
};

/// Number of messages fetched per history page.
pub const PAGE_SIZE: u32 = 30;
