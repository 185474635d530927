/// Rayabaari Crypto Library
///
/// Shared symmetric key encryption (AES-256-GCM) for message bodies and room
/// secret codes. Every client of a deployment holds the same key, provisioned
/// through configuration.

pub mod codec;
pub mod encrypt;
pub mod keys;

pub use codec::{Codec, UNREADABLE};
