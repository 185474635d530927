//! Push notification fan-out for new messages.
//!
//! Every insert is announced to the registered subscriptions of everyone but
//! the author. Notifications name the author only; message content never
//! leaves the database.

pub mod notifier;
pub mod transport;

pub use notifier::{Notifier, PushReport};
pub use transport::{PushError, PushPayload, PushTransport, RelayTransport};
