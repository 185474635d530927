use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};

pub const NONCE_LEN: usize = 12;

/// Encrypt a plaintext with AES-256-GCM.
/// Returns nonce followed by ciphertext and tag.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` payload produced by [`seal`].
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() <= NONCE_LEN {
        return Err(anyhow!("Ciphertext too short"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_key();
        let message = b"Hello from Rayabaari!";

        let sealed = seal(&key, message).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], message);

        assert_eq!(open(&key, &sealed).unwrap(), message);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&generate_key(), b"Secret message").unwrap();
        assert!(open(&generate_key(), &sealed).is_err());
    }

    #[test]
    fn truncated_payload_fails() {
        assert!(open(&generate_key(), &[0u8; NONCE_LEN]).is_err());
    }
}
