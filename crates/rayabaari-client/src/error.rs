use thiserror::Error;

use rayabaari_types::{BackendError, MessageId};

/// Failures surfaced to the user. Data-shape problems (undecryptable bodies,
/// missing reply targets, odd presence payloads) never show up here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to load: {0}")]
    Fetch(#[source] BackendError),

    #[error("request failed: {0}")]
    Mutation(#[source] BackendError),

    #[error("upload failed: {0}")]
    Upload(#[source] BackendError),

    #[error("could not join room channel: {0}")]
    Subscribe(#[source] BackendError),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("nothing to send")]
    EmptyMessage,

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid secret code")]
    InvalidSecretCode,

    #[error("message {0} is not loaded")]
    UnknownMessage(MessageId),

    #[error("attachments cannot be added while editing")]
    AttachWhileEditing,

    #[error("room channel closed")]
    ChannelClosed,
}

pub type ChatResult<T> = Result<T, ChatError>;
