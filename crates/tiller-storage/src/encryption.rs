// Symmetric encryption for secret values.
// Uses AES-256-GCM with a single 32-byte key loaded at startup; ciphertexts
// are stored as base64(nonce || sealed). Key strings are base64 in either
// the standard or URL-safe alphabet, so Fernet-format keys decode unchanged.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL};
use base64::Engine;
use rand::RngCore;

use tiller_core::error::{EngineError, Result};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Environment variable holding the base64 encryption key
pub const ENCRYPTION_KEY_ENV: &str = "TILLER_ENCRYPTION_KEY";

/// Secret cipher shared by every store that holds encrypted values.
/// Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Create from a base64-encoded 32-byte key (standard or URL-safe alphabet)
    pub fn new(key: &str) -> Result<Self> {
        let key_bytes = decode_key(key)?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| EngineError::encryption(format!("failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Create from the TILLER_ENCRYPTION_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
            EngineError::encryption(format!("{ENCRYPTION_KEY_ENV} environment variable not set"))
        })?;
        Self::new(&key)
    }

    /// Encrypt a plaintext string; returns base64(nonce || ciphertext)
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::encryption(format!("encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a base64(nonce || ciphertext) string back to plaintext
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let payload = BASE64
            .decode(ciphertext)
            .map_err(|e| EngineError::encryption(format!("ciphertext is not valid base64: {e}")))?;

        if payload.len() < NONCE_SIZE {
            return Err(EngineError::encryption("ciphertext too short"));
        }

        let (nonce_bytes, sealed) = payload.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, sealed)
            .map_err(|_| EngineError::encryption("decryption failed (wrong key or corrupted data)"))?;

        String::from_utf8(plaintext)
            .map_err(|_| EngineError::encryption("decrypted data is not valid UTF-8"))
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    let key = key.trim();
    let decoded = BASE64
        .decode(key)
        .or_else(|_| BASE64_URL.decode(key))
        .map_err(|e| EngineError::encryption(format!("key is not valid base64: {e}")))?;

    if decoded.len() != KEY_SIZE {
        return Err(EngineError::encryption(format!(
            "key must decode to {KEY_SIZE} bytes, got {}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

/// Generate a new random key in URL-safe base64 (the Fernet key format)
pub fn generate_encryption_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64_URL.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
        let plaintext = "sk-test-api-key-12345";
        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_round_trip_unicode_and_symbols() {
        let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
        for plaintext in ["", "héllo wörld", "密码 🔑", "a\"b'c\\d\n\t${secret:x}"] {
            let encrypted = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "same");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn test_standard_and_urlsafe_key_alphabets() {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);

        let standard = SecretCipher::new(&BASE64.encode(key)).unwrap();
        let urlsafe = SecretCipher::new(&BASE64_URL.encode(key)).unwrap();

        let encrypted = standard.encrypt("shared").unwrap();
        assert_eq!(urlsafe.decrypt(&encrypted).unwrap(), "shared");
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
        let other = SecretCipher::new(&generate_encryption_key()).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(SecretCipher::new("not base64 at all!!!").is_err());
        assert!(SecretCipher::new(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_corrupted_ciphertext_rejected() {
        let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
        assert!(cipher.decrypt("AAAA").is_err());
        let mut encrypted = cipher.encrypt("x").unwrap();
        encrypted.replace_range(0..2, "zz");
        assert!(cipher.decrypt(&encrypted).is_err());
    }
}
