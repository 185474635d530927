use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

const PASSPHRASE_SALT: &[u8] = b"rayabaari/content-key/v1";
const PBKDF2_ITERS: u32 = 100_000;

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for configuration files.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Decode a base64 key.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64.decode(encoded.trim())?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("Invalid key length"))?;
    Ok(key)
}

/// Stretch a shared passphrase into a key.
/// The salt is fixed so every client of a deployment derives the same key.
pub fn key_from_passphrase(passphrase: &str) -> Result<[u8; 32]> {
    if passphrase.is_empty() {
        return Err(anyhow!("Empty passphrase"));
    }
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), PASSPHRASE_SALT, PBKDF2_ITERS, &mut key);
    Ok(key)
}
