use std::fmt;

use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::warn;

use crate::encrypt::{open, seal};
use crate::keys::{key_from_base64, key_from_passphrase};

/// Shown in place of any body that cannot be decrypted.
pub const UNREADABLE: &str = "[Encrypted Content]";

/// Text codec for everything stored encrypted at rest: message bodies and
/// room secret codes. The stored form is `base64(nonce || ciphertext)`.
#[derive(Clone)]
pub struct Codec {
    key: [u8; 32],
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").field("key", &"<redacted>").finish()
    }
}

impl Codec {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build from the configured secret: a base64 key if it decodes to
    /// 32 bytes, otherwise a passphrase.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(anyhow!("Encryption secret is empty"));
        }
        let key = match key_from_base64(secret) {
            Ok(key) => key,
            Err(_) => key_from_passphrase(secret)?,
        };
        Ok(Self::new(key))
    }

    /// Empty input stays empty. Failure is an error: callers must not store
    /// plaintext in its place.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let sealed = seal(&self.key, plaintext.as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    /// Empty input stays empty. Anything undecryptable becomes [`UNREADABLE`].
    pub fn decrypt(&self, ciphertext: &str) -> String {
        if ciphertext.is_empty() {
            return String::new();
        }
        match self.try_decrypt(ciphertext) {
            Ok(text) => text,
            Err(e) => {
                warn!("Unreadable content: {}", e);
                UNREADABLE.to_string()
            }
        }
    }

    fn try_decrypt(&self, ciphertext: &str) -> Result<String> {
        let sealed = BASE64.decode(ciphertext.trim())?;
        let plaintext = String::from_utf8(open(&self.key, &sealed)?)?;
        if plaintext.is_empty() {
            return Err(anyhow!("Decryption returned empty text"));
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key, key_to_base64};

    fn codec() -> Codec {
        Codec::new(generate_key())
    }

    #[test]
    fn hello_roundtrip() {
        let codec = codec();
        let sealed = codec.encrypt("hello").unwrap();
        assert_ne!(sealed, "hello");
        assert_eq!(codec.decrypt(&sealed), "hello");
    }

    #[test]
    fn unicode_roundtrip() {
        let codec = codec();
        for text in ["नमस्ते", "a", "line one\nline two", "👍❤️😂"] {
            assert_eq!(codec.decrypt(&codec.encrypt(text).unwrap()), text);
        }
    }

    #[test]
    fn empty_stays_empty() {
        let codec = codec();
        assert_eq!(codec.encrypt("").unwrap(), "");
        assert_eq!(codec.decrypt(""), "");
    }

    #[test]
    fn tampered_byte_is_unreadable() {
        let codec = codec();
        let sealed = codec.encrypt("hello").unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(codec.decrypt(&BASE64.encode(&bytes)), UNREADABLE);

        let mut chars: Vec<char> = sealed.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert_eq!(codec.decrypt(&tampered), UNREADABLE);
    }

    #[test]
    fn garbage_is_unreadable() {
        let codec = codec();
        for garbage in ["not base64 at all!", "aGVsbG8=", "plain legacy text", "====", "\u{0}"] {
            assert_eq!(codec.decrypt(garbage), UNREADABLE);
        }
    }

    #[test]
    fn other_key_is_unreadable() {
        let sealed = codec().encrypt("for someone else").unwrap();
        assert_eq!(codec().decrypt(&sealed), UNREADABLE);
    }

    #[test]
    fn secret_accepts_base64_key() {
        let key = generate_key();
        let from_secret = Codec::from_secret(&key_to_base64(&key)).unwrap();
        let direct = Codec::new(key);
        assert_eq!(direct.decrypt(&from_secret.encrypt("same key").unwrap()), "same key");
        assert!(Codec::from_secret("   ").is_err());
    }
}
